use core::fmt;
use core::num::NonZeroU64;
use crate::destructor::Destructor;
use crate::error::{report_and_terminate, AllocError};
use crate::heap::Heap;
use crate::region::BufferRef;
use crate::value::{read_word, write_word, Payload};

/// every block starts with a refcount word and a destructor word.
pub const HEADER_SIZE: usize = 16;

const COUNT_OFFSET: usize = 0;
const DESTRUCTOR_OFFSET: usize = 8;


/// a live, reference-counted block. the null block is `None`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef(BufferRef);

impl BlockRef {
    #[inline]
    pub fn buffer(self) -> BufferRef {
        self.0
    }

    /// the word stored for a (possibly null) block inside a payload.
    #[inline]
    pub fn to_bits(block: Option<BlockRef>) -> u64 {
        block.map_or(0, |b| b.0.to_bits().get())
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Option<BlockRef> {
        NonZeroU64::new(bits).map(|bits| BlockRef(BufferRef::from_bits(bits)))
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Block({:?})", self.0)
    }
}


impl Heap {
    /// allocate a block with room for `payload_size` bytes and a refcount of 1.
    /// an empty payload needs no storage, so it comes back as the null block.
    pub fn allocate(&mut self, payload_size: usize, destructor: Option<Destructor>) -> Option<BlockRef> {
        self.try_allocate(payload_size, destructor).unwrap_or_else(|e| report_and_terminate(&e))
    }

    pub fn try_allocate(&mut self, payload_size: usize, destructor: Option<Destructor>) -> Result<Option<BlockRef>, AllocError> {
        if payload_size == 0 { return Ok(None) }
        self.try_allocate_block(payload_size, destructor).map(Some)
    }

    pub(crate) fn allocate_block(&mut self, payload_size: usize, destructor: Option<Destructor>) -> BlockRef {
        self.try_allocate_block(payload_size, destructor).unwrap_or_else(|e| report_and_terminate(&e))
    }

    fn try_allocate_block(&mut self, payload_size: usize, destructor: Option<Destructor>) -> Result<BlockRef, AllocError> {
        // a request that can't fit beside the header can't be satisfied at all.
        let size = HEADER_SIZE.checked_add(payload_size).ok_or(AllocError::FallbackExhausted { bytes: payload_size })?;
        let buffer = self.try_buffer_allocate(size)?;
        let bytes = self.buffer_mut(buffer);
        // recycled slabs still hold their last tenant.
        for b in bytes.iter_mut() { *b = 0 }
        write_word(bytes, COUNT_OFFSET, 1);
        write_word(bytes, DESTRUCTOR_OFFSET, Destructor::code(destructor));
        self.blocks_live += 1;
        let block = BlockRef(buffer);
        log::trace!("allocate: {:?} payload={} destructor={:?}", block, payload_size, destructor);
        Ok(block)
    }

    pub fn retain(&mut self, block: Option<BlockRef>) {
        let block = match block { Some(b) => b, None => return };
        self.check_live(block);
        let count = self.reference_count(block) + 1;
        write_word(self.buffer_mut(block.0), COUNT_OFFSET, count);
        log::trace!("retain: {:?} refcount -> {}", block, count);
    }

    /// drop one reference. the last one runs the destructor, which may still
    /// read the payload, and then hands the storage back to the allocator.
    pub fn release(&mut self, block: Option<BlockRef>) {
        let block = match block { Some(b) => b, None => return };
        self.check_live(block);
        let count = self.reference_count(block);
        if self.config.debug_checks {
            assert!(count > 0, "refcount underflow on {:?}", block);
        }
        let count = count.wrapping_sub(1);
        write_word(self.buffer_mut(block.0), COUNT_OFFSET, count);
        log::trace!("release: {:?} refcount -> {}", block, count);
        if count > 0 { return }

        if let Some(destructor) = self.destructor(block) {
            destructor.run(self, block);
        }
        log::trace!("release: freeing {:?}", block);
        self.blocks_live -= 1;
        self.buffer_free(block.0);
    }

    #[inline]
    pub fn reference_count(&self, block: BlockRef) -> u64 {
        read_word(self.buffer(block.0), COUNT_OFFSET)
    }

    pub fn destructor(&self, block: BlockRef) -> Option<Destructor> {
        Destructor::from_code(read_word(self.buffer(block.0), DESTRUCTOR_OFFSET))
    }

    /// whether the block's storage is still handed out. only meaningful
    /// until the slab is reused by another allocation.
    pub fn is_live(&self, block: BlockRef) -> bool {
        self.slab_header(block.0).map_or(false, |h| h.live)
    }

    /// the payload area: everything in the buffer after the header. this can
    /// be a little longer than what was asked for, since slabs round up.
    #[inline]
    pub fn payload(&self, block: BlockRef) -> &[u8] {
        &self.buffer(block.0)[HEADER_SIZE..]
    }

    #[inline]
    pub fn payload_mut(&mut self, block: BlockRef) -> &mut [u8] {
        &mut self.buffer_mut(block.0)[HEADER_SIZE..]
    }

    /// write a value into the payload at `offset`. this is a plain store:
    /// ownership of any handle inside `value` moves into the block.
    pub fn store<T: Payload>(&mut self, block: BlockRef, offset: usize, value: &T) {
        value.encode(&mut self.payload_mut(block)[offset .. offset + T::SIZE]);
    }

    pub fn load<T: Payload>(&self, block: BlockRef, offset: usize) -> T {
        T::decode(&self.payload(block)[offset .. offset + T::SIZE])
    }

    fn check_live(&self, block: BlockRef) {
        if self.config.debug_checks {
            assert!(self.is_live(block), "use of freed block {:?}", block);
        }
    }
}
