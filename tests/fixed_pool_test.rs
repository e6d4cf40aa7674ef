use proptest::prelude::*;
use std::collections::HashSet;
use std::ptr::NonNull;
use tidepool::{BlockAlloc, FixedBlockPool};

#[test]
fn test_values_survive_neighbouring_frees() {
    let mut pool = FixedBlockPool::<[u64; 4]>::with_slab_len(8);
    let ptrs: Vec<_> = (0..20u64).map(|i| pool.alloc([i; 4]).unwrap()).collect();
    assert_eq!(pool.slab_count(), 3);

    for p in ptrs.iter().step_by(2) {
        unsafe { pool.free(*p) };
    }
    for (i, p) in ptrs.iter().enumerate().skip(1).step_by(2) {
        assert_eq!(unsafe { *p.as_ptr() }, [i as u64; 4]);
    }
    assert_eq!(pool.len(), 10);
}

#[test]
fn test_freed_slots_are_reused_before_growth() {
    let mut pool = FixedBlockPool::<u32>::with_slab_len(16);
    let first: Vec<_> = (0..16).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(pool.slab_count(), 1);

    unsafe { pool.deallocate_all(first.iter().copied()) };
    assert!(pool.is_empty());

    let again: HashSet<_> = (0..16).map(|_| pool.allocate().unwrap()).collect();
    assert_eq!(pool.slab_count(), 1);
    assert_eq!(again, first.into_iter().collect::<HashSet<_>>());
}

#[test]
fn test_drop_with_outstanding_items() {
    let mut pool = FixedBlockPool::<u64>::with_slab_len(4);
    for i in 0..10 {
        let p = pool.allocate().unwrap();
        unsafe { p.as_ptr().write(i) };
    }
    assert_eq!(pool.slab_count(), 3);
    assert_eq!(pool.capacity(), 12);
    drop(pool);
}

#[derive(Debug, Clone)]
enum Op {
    Alloc(u64),
    Free(usize),
}

proptest! {
    #[test]
    fn test_live_addresses_are_unique(ops in proptest::collection::vec(
        prop_oneof![
            any::<u64>().prop_map(Op::Alloc),
            any::<usize>().prop_map(Op::Free),
        ],
        1..300
    )) {
        let mut pool = FixedBlockPool::<u64>::with_slab_len(8);
        let mut live: Vec<(NonNull<u64>, u64)> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(v) => {
                    let p = pool.alloc(v).unwrap();
                    prop_assert!(live.iter().all(|(q, _)| *q != p), "address handed out twice");
                    live.push((p, v));
                }
                Op::Free(i) if !live.is_empty() => {
                    let (p, v) = live.swap_remove(i % live.len());
                    prop_assert_eq!(unsafe { *p.as_ptr() }, v);
                    unsafe { pool.free(p) };
                }
                Op::Free(_) => {}
            }
        }

        prop_assert_eq!(pool.len(), live.len());
        for (p, v) in &live {
            prop_assert_eq!(unsafe { *p.as_ptr() }, *v);
        }
    }
}
