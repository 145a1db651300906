//! Property tests for the slab heap and the refcount protocol.

use core::cell::Cell;
use std::rc::Rc;
use proptest::prelude::*;
use slabrc::{Heap, HeapConfig, BUCKET_SIZES, MAX_SLAB_SIZE};

#[derive(Clone, Debug)]
enum Op {
    Allocate(usize),
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..=200).prop_map(Op::Allocate),
        any::<usize>().prop_map(Op::Free),
    ]
}

proptest! {
    /// live buffers never alias, and each one keeps what was written to it.
    #[test]
    fn buffers_keep_their_contents(ops in prop::collection::vec(op(), 1..300)) {
        let mut h = Heap::with_config(HeapConfig::default().region_slab_count(16).debug_checks(true));
        let mut live = Vec::new();
        let mut stamp = 0u8;
        for op in ops {
            match op {
                Op::Allocate(size) => {
                    let b = h.buffer_allocate(size);
                    stamp = stamp.wrapping_add(1);
                    for byte in h.buffer_mut(b).iter_mut() { *byte = stamp }
                    live.push((b, stamp));
                }
                Op::Free(i) if !live.is_empty() => {
                    let (b, _) = live.swap_remove(i % live.len());
                    h.buffer_free(b);
                }
                Op::Free(_) => {}
            }
            for (b, stamp) in live.iter() {
                prop_assert!(h.buffer(*b).iter().all(|byte| byte == stamp));
            }
        }
        let stats = h.stats();
        let slabs: usize = stats.buckets.iter().map(|s| s.live).sum();
        prop_assert_eq!(slabs + stats.fallback_live, live.len());
    }

    /// a block survives exactly as long as 1 + retains - releases > 0.
    #[test]
    fn destructor_fires_once(retains in 0usize..20, payload in 1usize..100) {
        let mut h = Heap::new();
        let fired = Rc::new(Cell::new(0));
        let fired_inner = fired.clone();
        let d = h.register_destructor(move |_, _| fired_inner.set(fired_inner.get() + 1));
        let b = h.allocate(payload, Some(d));
        for _ in 0..retains { h.retain(b) }
        for _ in 0..retains {
            h.release(b);
            prop_assert_eq!(fired.get(), 0);
            prop_assert!(h.is_live(b.unwrap()));
        }
        h.release(b);
        prop_assert_eq!(fired.get(), 1);
        prop_assert_eq!(h.stats().blocks_live, 0);
    }

    /// a small request is always served by the tightest bucket.
    #[test]
    fn tightest_bucket(size in 1usize..=MAX_SLAB_SIZE) {
        let mut h = Heap::new();
        let b = h.buffer_allocate(size);
        let bucket = h.slab_header(b).unwrap().owner.unwrap();
        prop_assert!(BUCKET_SIZES[bucket] >= size);
        prop_assert!(bucket == 0 || BUCKET_SIZES[bucket - 1] < size);
    }
}
