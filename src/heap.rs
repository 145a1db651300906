use core::fmt;
use std::collections::HashMap;
use std::rc::Rc;
use crate::block::BlockRef;
use crate::destructor::{Destructor, Shape};
use crate::error::{report_and_terminate, AllocError};
use crate::region::{BufferRef, Region, SlabHeader};
use crate::slab::SlabAllocator;
use crate::value::LiteralId;
use crate::{bucket_for, HeapConfig, BUCKET_COUNT, BUCKET_SIZES};

pub(crate) type DestructorFn = Rc<dyn Fn(&mut Heap, BlockRef)>;


/// a buffer too big for any bucket, straight from the system allocator.
pub struct FallbackBuffer {
    pub header: SlabHeader,
    data: Box<[u8]>,
}

/// one entry in the heap's arena. regions stay forever; fallback buffers
/// come and go, and their vacated entries are chained for reuse.
pub enum Extent {
    Region(Region),
    Fallback(FallbackBuffer),
    Vacant(Option<u32>),
}

pub struct ExtentTable {
    extents: Vec<Extent>,
    vacant: Option<u32>,
}

impl ExtentTable {
    pub fn new() -> ExtentTable {
        ExtentTable { extents: Vec::new(), vacant: None }
    }

    pub fn insert(&mut self, extent: Extent) -> Result<u32, AllocError> {
        if let Some(id) = self.vacant {
            self.vacant = match self.extents[id as usize] {
                Extent::Vacant(next) => next,
                _ => None,
            };
            self.extents[id as usize] = extent;
            return Ok(id);
        }
        let id = self.extents.len();
        if id >= u32::MAX as usize { return Err(AllocError::ExtentTableFull) }
        self.extents.push(extent);
        Ok(id as u32)
    }

    /// vacate an entry, handing back what was there.
    pub fn remove(&mut self, id: u32) -> Extent {
        let old = core::mem::replace(&mut self.extents[id as usize], Extent::Vacant(self.vacant));
        self.vacant = Some(id);
        old
    }

    pub fn get(&self, id: u32) -> Option<&Extent> {
        self.extents.get(id as usize)
    }

    pub fn region(&self, id: u32) -> &Region {
        match &self.extents[id as usize] {
            Extent::Region(region) => region,
            _ => panic!("extent {} is not a region", id),
        }
    }

    pub fn region_mut(&mut self, id: u32) -> &mut Region {
        match &mut self.extents[id as usize] {
            Extent::Region(region) => region,
            _ => panic!("extent {} is not a region", id),
        }
    }

    /// the slab header behind a buffer, found by index in O(1).
    /// `None` if the buffer's extent has been vacated.
    pub fn header(&self, buffer: BufferRef) -> Option<&SlabHeader> {
        match self.extents.get(buffer.extent as usize)? {
            Extent::Region(region) => Some(region.header(buffer.slot)),
            Extent::Fallback(fallback) => Some(&fallback.header),
            Extent::Vacant(_) => None,
        }
    }

    pub fn header_mut(&mut self, buffer: BufferRef) -> &mut SlabHeader {
        match &mut self.extents[buffer.extent as usize] {
            Extent::Region(region) => region.header_mut(buffer.slot),
            Extent::Fallback(fallback) => &mut fallback.header,
            Extent::Vacant(_) => panic!("buffer {:?} was already released", buffer),
        }
    }

    pub fn bytes(&self, buffer: BufferRef) -> &[u8] {
        match &self.extents[buffer.extent as usize] {
            Extent::Region(region) => region.slab(buffer.slot),
            Extent::Fallback(fallback) => &fallback.data,
            Extent::Vacant(_) => panic!("buffer {:?} was already released", buffer),
        }
    }

    pub fn bytes_mut(&mut self, buffer: BufferRef) -> &mut [u8] {
        match &mut self.extents[buffer.extent as usize] {
            Extent::Region(region) => region.slab_mut(buffer.slot),
            Extent::Fallback(fallback) => &mut fallback.data,
            Extent::Vacant(_) => panic!("buffer {:?} was already released", buffer),
        }
    }
}


#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BucketStats {
    pub slab_size: usize,
    pub regions: usize,
    pub live: usize,
    pub free: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeapStats {
    pub buckets: [BucketStats; BUCKET_COUNT],
    pub fallback_live: usize,
    pub blocks_live: usize,
}


/// the allocator context. one per process in practice; every allocation,
/// retain and release goes through it. not thread-safe: callers that share
/// a heap across threads must lock around it.
pub struct Heap {
    pub(crate) config: HeapConfig,
    buckets: [SlabAllocator; BUCKET_COUNT],
    extents: ExtentTable,
    fallback_live: usize,
    pub(crate) blocks_live: usize,
    pub(crate) destructors: Vec<DestructorFn>,
    pub(crate) list_destructors: HashMap<Shape, Destructor>,
    pub(crate) literals: Vec<&'static str>,
    /// literal ids by (address, length) of the static text.
    pub(crate) literal_ids: HashMap<(usize, usize), LiteralId>,
}

impl Heap {
    pub fn new() -> Heap {
        Heap::with_config(HeapConfig::default())
    }

    pub fn with_config(config: HeapConfig) -> Heap {
        Heap {
            config,
            buckets: [
                SlabAllocator::new(0, BUCKET_SIZES[0]),
                SlabAllocator::new(1, BUCKET_SIZES[1]),
                SlabAllocator::new(2, BUCKET_SIZES[2]),
                SlabAllocator::new(3, BUCKET_SIZES[3]),
            ],
            extents: ExtentTable::new(),
            fallback_live: 0,
            blocks_live: 0,
            destructors: Vec::new(),
            list_destructors: HashMap::new(),
            literals: Vec::new(),
            literal_ids: HashMap::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// get a buffer of at least `size` bytes. running out of memory ends the process.
    pub fn buffer_allocate(&mut self, size: usize) -> BufferRef {
        self.try_buffer_allocate(size).unwrap_or_else(|e| report_and_terminate(&e))
    }

    pub fn try_buffer_allocate(&mut self, size: usize) -> Result<BufferRef, AllocError> {
        match bucket_for(size) {
            Some(bucket) => self.buckets[bucket].allocate(&mut self.extents, self.config.region_slab_count),
            None => self.allocate_fallback(size),
        }
    }

    fn allocate_fallback(&mut self, size: usize) -> Result<BufferRef, AllocError> {
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|_| AllocError::FallbackExhausted { bytes: size })?;
        data.resize(size, 0);
        let extent = self.extents.insert(Extent::Fallback(FallbackBuffer {
            header: SlabHeader::fallback(),
            data: data.into_boxed_slice(),
        }))?;
        self.fallback_live += 1;
        log::debug!("fallback: {} bytes at extent {}", size, extent);
        Ok(BufferRef::new(extent, 0))
    }

    /// hand a buffer back. the slab header alone decides where it goes:
    /// no owner means the system allocator, otherwise the owner's free list.
    pub fn buffer_free(&mut self, buffer: BufferRef) {
        let header = match self.extents.header(buffer) {
            Some(header) => *header,
            None => {
                if self.config.debug_checks { panic!("free of released buffer {:?}", buffer) }
                return;
            }
        };
        if self.config.debug_checks {
            assert!(header.live, "double free of buffer {:?}", buffer);
        }
        match header.owner {
            None => {
                self.extents.remove(buffer.extent);
                self.fallback_live -= 1;
                log::debug!("fallback: released extent {}", buffer.extent);
            }
            Some(bucket) => self.buckets[bucket].free(&mut self.extents, buffer),
        }
    }

    /// the usable bytes behind a buffer: the whole slab, or the exact fallback size.
    #[inline]
    pub fn buffer(&self, buffer: BufferRef) -> &[u8] {
        self.extents.bytes(buffer)
    }

    #[inline]
    pub fn buffer_mut(&mut self, buffer: BufferRef) -> &mut [u8] {
        self.extents.bytes_mut(buffer)
    }

    pub fn slab_header(&self, buffer: BufferRef) -> Option<&SlabHeader> {
        self.extents.header(buffer)
    }

    pub fn bucket(&self, index: usize) -> &SlabAllocator {
        &self.buckets[index]
    }

    pub fn extents(&self) -> &ExtentTable {
        &self.extents
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats { fallback_live: self.fallback_live, blocks_live: self.blocks_live, ..HeapStats::default() };
        for (out, bucket) in stats.buckets.iter_mut().zip(self.buckets.iter()) {
            *out = BucketStats {
                slab_size: bucket.slab_payload_size,
                regions: bucket.region_count(),
                live: bucket.live_count(),
                free: bucket.free_count(),
            };
        }
        stats
    }

    pub fn dump(&self) -> String {
        let mut spans = self.buckets.iter().map(|b| format!("{:?}", b)).collect::<Vec<String>>();
        spans.push(format!("fallback[live={}]", self.fallback_live));
        spans.join(", ")
    }
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Heap(blocks={}, ", self.blocks_live)?;
        if f.alternate() {
            write!(f, "{}", self.dump())?;
        } else {
            write!(f, "regions={}, fallback={}", self.buckets.iter().map(|b| b.region_count()).sum::<usize>(), self.fallback_live)?;
        }
        write!(f, ")")
    }
}


#[cfg(test)]
mod tests {
    use crate::{AllocError, Heap, HeapConfig};

    #[test]
    fn new_heap() {
        let h = Heap::new();
        assert_eq!(h.dump(), "8[regions=0 live=0 free=0], 16[regions=0 live=0 free=0], 32[regions=0 live=0 free=0], 64[regions=0 live=0 free=0], fallback[live=0]");
        assert_eq!(format!("{:?}", h), "Heap(blocks=0, regions=0, fallback=0)");
    }

    #[test]
    fn allocate() {
        let mut h = Heap::new();
        let b = h.buffer_allocate(12);
        assert_eq!(h.buffer(b).len(), 16);
        assert_eq!(h.slab_header(b).unwrap().owner, Some(1));
        assert_eq!(h.dump(), "8[regions=0 live=0 free=0], 16[regions=1 live=1 free=0], 32[regions=0 live=0 free=0], 64[regions=0 live=0 free=0], fallback[live=0]");
    }

    #[test]
    fn lifo_reuse() {
        let mut h = Heap::new();
        let a = h.buffer_allocate(30);
        h.buffer_free(a);
        assert_eq!(h.stats().buckets[2].free, 1);
        assert_eq!(h.buffer_allocate(17), a);
        assert_eq!(h.stats().buckets[2].free, 0);
    }

    #[test]
    fn fallback_round_trip() {
        let mut h = Heap::new();
        let small = h.buffer_allocate(8);
        h.buffer_free(small);
        let big = h.buffer_allocate(65);
        assert_eq!(h.buffer(big).len(), 65);
        assert_eq!(h.slab_header(big).unwrap().owner, None);
        assert_eq!(h.stats().fallback_live, 1);
        h.buffer_free(big);
        assert_eq!(h.stats().fallback_live, 0);
        assert!(h.slab_header(big).is_none());
        // the bucket's free list is untouched.
        assert_eq!(h.buffer_allocate(8), small);
    }

    #[test]
    fn fallback_extents_are_recycled() {
        let mut h = Heap::new();
        let a = h.buffer_allocate(100);
        h.buffer_free(a);
        let b = h.buffer_allocate(200);
        assert_eq!(a.extent, b.extent);
        assert_eq!(h.buffer(b).len(), 200);
    }

    #[test]
    fn fallback_exhaustion_leaves_no_trace() {
        let mut h = Heap::new();
        let kept = h.buffer_allocate(100);
        let before = h.stats();
        assert_eq!(h.try_buffer_allocate(usize::MAX), Err(AllocError::FallbackExhausted { bytes: usize::MAX }));
        assert_eq!(h.stats(), before);
        // the extent table didn't move either.
        let next = h.buffer_allocate(200);
        assert_eq!(next.extent, kept.extent + 1);
    }

    #[test]
    fn region_exhaustion_leaves_no_trace() {
        let mut h = Heap::with_config(HeapConfig::default().region_slab_count(usize::MAX / 8));
        let before = h.stats();
        assert_eq!(h.try_buffer_allocate(8), Err(AllocError::RegionExhausted { slab_size: 8, bytes: (usize::MAX / 8) * 8 }));
        // 64 * (usize::MAX / 8) doesn't even fit in a usize.
        assert_eq!(h.try_buffer_allocate(64), Err(AllocError::RegionExhausted { slab_size: 64, bytes: usize::MAX }));
        assert_eq!(h.stats(), before);
        assert_eq!(h.stats().buckets[0].regions, 0);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_is_caught() {
        let mut h = Heap::with_config(HeapConfig::default().debug_checks(true));
        let a = h.buffer_allocate(8);
        h.buffer_free(a);
        h.buffer_free(a);
    }
}
