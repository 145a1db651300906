//! slabrc: the heap runtime linked under compiler-generated code.
//!
//! Every runtime value lives in a reference-counted block with an optional
//! destructor. Blocks are carved out of size-classed slabs (8, 16, 32 and
//! 64 bytes), which are sliced from large bump-allocated regions and
//! recycled through a per-bucket free list. Anything bigger than the
//! largest bucket goes to the system allocator.
//!
//! Memory is addressed by arena index (region + slot) rather than by raw
//! pointer, so the whole heap is safe rust. The heap is a plain context
//! object: generated code owns one, tests build fresh ones.

#[macro_use]
extern crate static_assertions;

pub mod block;
pub mod destructor;
pub mod error;
pub mod heap;
pub mod list;
pub mod region;
pub mod slab;
pub mod value;

pub use self::block::{BlockRef, HEADER_SIZE};
pub use self::destructor::{CustomDestructor, Destructor, Shape};
pub use self::error::{report_and_terminate, AllocError};
pub use self::heap::{BucketStats, Heap, HeapStats};
pub use self::list::ListValue;
pub use self::region::{BufferRef, Region, SlabHeader};
pub use self::slab::SlabAllocator;
pub use self::value::{ClosureValue, EntryPoint, LiteralId, Payload, StringStorage, StringValue};


/// configurable things:
/// payload sizes of each slab bucket, smallest first.
pub const BUCKET_SIZES: [usize; BUCKET_COUNT] = [8, 16, 32, 64];
pub const BUCKET_COUNT: usize = 4;

/// anything above this skips the slabs and goes to the system allocator.
pub const MAX_SLAB_SIZE: usize = 64;

/// how many slabs are sliced out of each region.
pub const DEFAULT_REGION_SLAB_COUNT: usize = 16384;

const_assert!(max_slab_size; BUCKET_SIZES[BUCKET_COUNT - 1] == MAX_SLAB_SIZE);
const_assert!(smallest_bucket; BUCKET_SIZES[0] == 8);
const_assert!(buckets_ascend; BUCKET_SIZES[1] == 2 * BUCKET_SIZES[0] && BUCKET_SIZES[2] == 2 * BUCKET_SIZES[1] && BUCKET_SIZES[3] == 2 * BUCKET_SIZES[2]);
// a block header plus the smallest payload has to land in a slab.
const_assert!(header_fits; HEADER_SIZE + 1 <= MAX_SLAB_SIZE);


/// request size -> bucket index, for every size a slab can serve.
/// each size rounds up to its bucket: 9..16 bytes all land in the 16s.
pub const BUCKET_OF: [usize; MAX_SLAB_SIZE + 1] = {
    let mut table = [0usize; MAX_SLAB_SIZE + 1];
    let mut size = 1;
    while size <= MAX_SLAB_SIZE {
        let mut bucket = 0;
        while BUCKET_SIZES[bucket] < size { bucket += 1 }
        table[size] = bucket;
        size += 1;
    }
    table
};

/// which bucket serves `size`, or `None` if it needs the fallback path.
#[inline]
pub fn bucket_for(size: usize) -> Option<usize> {
    if size > MAX_SLAB_SIZE { None } else { Some(BUCKET_OF[size]) }
}


/// knobs for a new heap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeapConfig {
    /// slabs per region. smaller regions are handy for exercising region growth.
    pub region_slab_count: usize,
    /// panic on refcount underflow and double free instead of trusting the caller.
    pub debug_checks: bool,
}

impl HeapConfig {
    pub fn region_slab_count(mut self, count: usize) -> HeapConfig {
        assert!(count > 0, "a region must hold at least one slab");
        self.region_slab_count = count;
        self
    }

    pub fn debug_checks(mut self, enabled: bool) -> HeapConfig {
        self.debug_checks = enabled;
        self
    }
}

impl Default for HeapConfig {
    fn default() -> HeapConfig {
        HeapConfig {
            region_slab_count: DEFAULT_REGION_SLAB_COUNT,
            debug_checks: cfg!(debug_assertions),
        }
    }
}
