use core::fmt;
use core::num::NonZeroU64;
use crate::error::AllocError;

/// which bucket a slab belongs to: an index into `BUCKET_SIZES`.
pub type Bucket = usize;

/// address of one buffer handed out by the heap: an entry in the heap's
/// extent table plus a slot inside it. fallback buffers always use slot 0.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRef {
    pub extent: u32,
    pub slot: u32,
}

impl BufferRef {
    pub fn new(extent: u32, slot: u32) -> BufferRef {
        BufferRef { extent, slot }
    }

    /// pack into a word that is never zero, so zero can mean "null" when
    /// a handle is stored inside a payload.
    #[inline]
    pub fn to_bits(self) -> NonZeroU64 {
        let bits = ((self.extent as u64 + 1) << 32) | self.slot as u64;
        // extent + 1 is at least 1, so the high half is never empty.
        NonZeroU64::new(bits).unwrap_or(NonZeroU64::MAX)
    }

    #[inline]
    pub fn from_bits(bits: NonZeroU64) -> BufferRef {
        let bits = bits.get();
        BufferRef { extent: ((bits >> 32) - 1) as u32, slot: bits as u32 }
    }
}

impl fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.extent, self.slot)
    }
}


/// bookkeeping for one slab. the owner is fixed when the slab is sliced
/// (or when a fallback buffer is created) and freeing dispatches on it alone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlabHeader {
    /// `None` means the buffer came from the fallback allocator.
    pub owner: Option<Bucket>,
    /// only meaningful while the slab sits on a free list.
    pub next_free: Option<BufferRef>,
    pub live: bool,
}

impl SlabHeader {
    pub fn sliced(owner: Bucket) -> SlabHeader {
        SlabHeader { owner: Some(owner), next_free: None, live: true }
    }

    pub fn fallback() -> SlabHeader {
        SlabHeader { owner: None, next_free: None, live: true }
    }
}


/// a large extent sliced into equal slabs for one bucket. slabs are handed
/// out by bumping `next_slot`; once handed out, a slab is only ever recycled
/// through its bucket's free list. regions live as long as the heap.
pub struct Region {
    pub next: Option<u32>,
    pub next_slot: usize,
    slab_size: usize,
    slab_count: usize,
    headers: Vec<SlabHeader>,
    data: Vec<u8>,
}

impl Region {
    pub fn new(slab_size: usize, slab_count: usize) -> Result<Region, AllocError> {
        let bytes = slab_size.checked_mul(slab_count).ok_or(AllocError::RegionExhausted { slab_size, bytes: usize::MAX })?;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes).map_err(|_| AllocError::RegionExhausted { slab_size, bytes })?;
        data.resize(bytes, 0);
        let mut headers = Vec::new();
        headers.try_reserve_exact(slab_count).map_err(|_| AllocError::RegionExhausted { slab_size, bytes })?;
        Ok(Region { next: None, next_slot: 0, slab_size, slab_count, headers, data })
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.next_slot == self.slab_count
    }

    #[inline]
    pub fn slab_count(&self) -> usize {
        self.slab_count
    }

    /// bump off the next slab, stamping it with its owner.
    /// the caller checks `is_full` first.
    pub fn slice(&mut self, owner: Bucket) -> u32 {
        assert!(!self.is_full(), "slicing a full region");
        let slot = self.next_slot;
        self.headers.push(SlabHeader::sliced(owner));
        self.next_slot += 1;
        slot as u32
    }

    #[inline]
    pub fn header(&self, slot: u32) -> &SlabHeader {
        &self.headers[slot as usize]
    }

    #[inline]
    pub fn header_mut(&mut self, slot: u32) -> &mut SlabHeader {
        &mut self.headers[slot as usize]
    }

    pub fn slab(&self, slot: u32) -> &[u8] {
        let start = slot as usize * self.slab_size;
        &self.data[start .. start + self.slab_size]
    }

    pub fn slab_mut(&mut self, slot: u32) -> &mut [u8] {
        let start = slot as usize * self.slab_size;
        &mut self.data[start .. start + self.slab_size]
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Region({}x{}, used={})", self.slab_count, self.slab_size, self.next_slot)
    }
}
