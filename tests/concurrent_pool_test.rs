use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::{mpsc, Barrier};
use std::thread;
use tidepool::{AllocError, BlockAlloc, ConcurrentBlockPool};

const THREADS: usize = 4;
const PER_THREAD: usize = 5_000;

#[test]
fn test_owner_reuses_items_released_elsewhere() {
    let mut pool = ConcurrentBlockPool::<u64>::new();
    let addrs: Vec<usize> = (0..THREADS * PER_THREAD)
        .map(|i| pool.alloc(i as u64).unwrap().as_ptr() as usize)
        .collect();
    let pages = pool.page_count();
    assert!(pages > 1);

    thread::scope(|s| {
        for chunk in addrs.chunks(PER_THREAD) {
            s.spawn(move || {
                for &addr in chunk {
                    let ptr = NonNull::new(addr as *mut u64).unwrap();
                    unsafe { ConcurrentBlockPool::<u64>::release(ptr) };
                }
            });
        }
    });

    let again: Vec<usize> = (0..THREADS * PER_THREAD)
        .map(|_| pool.allocate().unwrap().as_ptr() as usize)
        .collect();
    assert_eq!(pool.page_count(), pages);

    let mut sorted = again;
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), THREADS * PER_THREAD);
}

#[test]
fn test_pools_free_each_others_items() {
    let barrier = Barrier::new(THREADS);
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..THREADS).map(|_| mpsc::channel::<Vec<usize>>()).unzip();

    thread::scope(|s| {
        for (i, inbox) in receivers.into_iter().enumerate() {
            let neighbour = senders[(i + 1) % THREADS].clone();
            let barrier = &barrier;
            s.spawn(move || {
                let mut pool = ConcurrentBlockPool::<u64>::new();
                let mine: Vec<usize> = (0..PER_THREAD)
                    .map(|j| pool.alloc((i * PER_THREAD + j) as u64).unwrap().as_ptr() as usize)
                    .collect();
                let pages = pool.page_count();
                neighbour.send(mine).unwrap();

                let theirs = inbox.recv().unwrap();
                for (j, addr) in theirs.into_iter().enumerate() {
                    let ptr = NonNull::new(addr as *mut u64).unwrap();
                    let from = (i + THREADS - 1) % THREADS;
                    assert_eq!(unsafe { *ptr.as_ptr() }, (from * PER_THREAD + j) as u64);
                    unsafe { pool.free(ptr) };
                }

                // Every remote free into this pool has landed.
                barrier.wait();
                for _ in 0..PER_THREAD {
                    pool.allocate().unwrap();
                }
                assert_eq!(pool.page_count(), pages);
            });
        }
    });
}

#[test]
fn test_interleaved_remote_and_local_frees() {
    let mut pool = ConcurrentBlockPool::<u32>::new();
    let per_page = ConcurrentBlockPool::<u32>::capacity_per_page();
    let addrs: Vec<usize> = (0..per_page * 2)
        .map(|_| pool.allocate().unwrap().as_ptr() as usize)
        .collect();
    assert_eq!(pool.page_count(), 2);

    let remote: Vec<usize> = addrs.iter().copied().step_by(2).collect();
    let local: Vec<usize> = addrs.iter().copied().skip(1).step_by(2).collect();
    thread::scope(|s| {
        s.spawn(|| {
            for &addr in &remote {
                unsafe { ConcurrentBlockPool::<u32>::release(NonNull::new(addr as *mut u32).unwrap()) };
            }
        });
        for &addr in &local {
            unsafe { pool.deallocate(NonNull::new(addr as *mut u32).unwrap()) };
        }
    });

    for _ in 0..per_page * 2 {
        pool.allocate().unwrap();
    }
    assert_eq!(pool.page_count(), 2);
}

#[test]
fn test_owner_allocates_while_another_thread_releases() {
    const ROUNDS: usize = 300_000;
    const IN_FLIGHT: usize = 256;

    let per_page = ConcurrentBlockPool::<u64>::capacity_per_page();
    let keep = per_page * 2;
    // Growth only happens once every page is fully handed out, plus one page
    // for a release that has retaken a page but not yet listed it.
    let max_pages = (keep + IN_FLIGHT + 1).div_ceil(per_page) + 1;
    let mut pool = ConcurrentBlockPool::<u64>::new().with_page_limit(max_pages);

    let (tx, rx) = mpsc::sync_channel::<(usize, u64)>(IN_FLIGHT);
    thread::scope(|s| {
        s.spawn(move || {
            for (addr, value) in rx {
                let ptr = NonNull::new(addr as *mut u64).unwrap();
                assert_eq!(unsafe { *ptr.as_ptr() }, value);
                unsafe { ConcurrentBlockPool::<u64>::release(ptr) };
            }
        });

        let mut live: Vec<(usize, u64)> = Vec::with_capacity(keep + 1);
        let mut handed_out = HashSet::with_capacity(keep + 1);
        let mut state = 0x9E37_79B9_7F4A_7C15_u64;
        for round in 0..ROUNDS as u64 {
            let addr = pool.alloc(round).unwrap().as_ptr() as usize;
            assert!(handed_out.insert(addr), "{addr:#x} handed out twice");
            live.push((addr, round));

            if live.len() > keep {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let (addr, value) = live.swap_remove(state as usize % live.len());
                handed_out.remove(&addr);
                if state % 4 == 0 {
                    let ptr = NonNull::new(addr as *mut u64).unwrap();
                    assert_eq!(unsafe { *ptr.as_ptr() }, value);
                    unsafe { pool.free(ptr) };
                } else {
                    tx.send((addr, value)).unwrap();
                }
            }
        }
        drop(tx);
    });

    assert!(pool.page_count() <= max_pages);
}

#[test]
fn test_page_limit_surfaces_error() {
    let mut pool = ConcurrentBlockPool::<u64>::new().with_page_limit(1);
    let per_page = ConcurrentBlockPool::<u64>::capacity_per_page();
    for _ in 0..per_page {
        pool.allocate().unwrap();
    }
    assert_eq!(pool.allocate(), Err(AllocError::PageLimit { limit: 1 }));
}
