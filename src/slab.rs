use core::fmt;
use crate::error::AllocError;
use crate::heap::{Extent, ExtentTable};
use crate::region::{Bucket, BufferRef, Region};

/// one size class: a free list of recycled slabs in front of a chain of
/// regions that new slabs are bumped out of.
pub struct SlabAllocator {
    pub bucket: Bucket,
    pub slab_payload_size: usize,
    free_list: Option<BufferRef>,
    first_region: Option<u32>,
    current_region: Option<u32>,
    regions: usize,
    live: usize,
    free: usize,
}

impl SlabAllocator {
    pub fn new(bucket: Bucket, slab_payload_size: usize) -> SlabAllocator {
        SlabAllocator {
            bucket,
            slab_payload_size,
            free_list: None,
            first_region: None,
            current_region: None,
            regions: 0,
            live: 0,
            free: 0,
        }
    }

    pub fn allocate(&mut self, extents: &mut ExtentTable, region_slab_count: usize) -> Result<BufferRef, AllocError> {
        // recycled slabs first, most recently freed on top.
        if let Some(slab) = self.free_list {
            let header = extents.header_mut(slab);
            self.free_list = header.next_free.take();
            header.live = true;
            self.free -= 1;
            self.live += 1;
            log::trace!("bucket {}: reuse {:?}", self.slab_payload_size, slab);
            return Ok(slab);
        }

        let region_id = match self.current_region {
            Some(id) if !extents.region(id).is_full() => id,
            previous => self.add_region(extents, previous, region_slab_count)?,
        };
        let slot = extents.region_mut(region_id).slice(self.bucket);
        self.live += 1;
        Ok(BufferRef::new(region_id, slot))
    }

    fn add_region(&mut self, extents: &mut ExtentTable, previous: Option<u32>, slab_count: usize) -> Result<u32, AllocError> {
        let region = Region::new(self.slab_payload_size, slab_count)?;
        let id = extents.insert(Extent::Region(region))?;
        match previous {
            None => self.first_region = Some(id),
            Some(prev) => extents.region_mut(prev).next = Some(id),
        }
        self.current_region = Some(id);
        self.regions += 1;
        log::debug!("bucket {}: new region #{} ({} slabs) at extent {}", self.slab_payload_size, self.regions, slab_count, id);
        Ok(id)
    }

    /// push a slab back on the free list. no coalescing.
    pub fn free(&mut self, extents: &mut ExtentTable, slab: BufferRef) {
        let header = extents.header_mut(slab);
        header.next_free = self.free_list;
        header.live = false;
        self.free_list = Some(slab);
        self.live -= 1;
        self.free += 1;
        log::trace!("bucket {}: free {:?}", self.slab_payload_size, slab);
    }

    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn first_region(&self) -> Option<u32> {
        self.first_region
    }

    /// walk the free list from the head. mostly for tests and dumps.
    pub fn free_slabs<'a>(&self, extents: &'a ExtentTable) -> FreeSlabIterator<'a> {
        FreeSlabIterator { extents, current: self.free_list }
    }

    /// walk the region chain from the first region.
    pub fn regions<'a>(&self, extents: &'a ExtentTable) -> RegionIterator<'a> {
        RegionIterator { extents, current: self.first_region }
    }
}

impl fmt::Debug for SlabAllocator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}[regions={} live={} free={}]", self.slab_payload_size, self.regions, self.live, self.free)
    }
}


pub struct FreeSlabIterator<'a> {
    extents: &'a ExtentTable,
    current: Option<BufferRef>,
}

impl<'a> Iterator for FreeSlabIterator<'a> {
    type Item = BufferRef;

    fn next(&mut self) -> Option<Self::Item> {
        let rv = self.current?;
        self.current = self.extents.header(rv).and_then(|h| h.next_free);
        Some(rv)
    }
}


pub struct RegionIterator<'a> {
    extents: &'a ExtentTable,
    current: Option<u32>,
}

impl<'a> Iterator for RegionIterator<'a> {
    type Item = &'a Region;

    fn next(&mut self) -> Option<Self::Item> {
        let region = self.extents.region(self.current?);
        self.current = region.next;
        Some(region)
    }
}
