use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::ptr::NonNull;
use std::thread;
use tidepool::{BlockAlloc, ConcurrentBlockPool, FixedBlockPool};

const BATCH_SIZE: usize = 1000;

fn bench_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("Alloc + Free 1000");

    group.bench_function("Box::new", |b| {
        b.iter(|| {
            let mut v = Vec::with_capacity(BATCH_SIZE);
            for i in 0..BATCH_SIZE {
                v.push(Box::new(i as u64));
            }
            black_box(v);
        })
    });

    group.bench_function("FixedBlockPool", |b| {
        let mut pool = FixedBlockPool::<u64>::new();
        let mut ptrs = Vec::with_capacity(BATCH_SIZE);
        b.iter(|| {
            for i in 0..BATCH_SIZE {
                ptrs.push(pool.alloc(i as u64).unwrap());
            }
            for p in ptrs.drain(..) {
                unsafe { pool.free(black_box(p)) };
            }
        })
    });

    group.bench_function("FixedBlockPool batch free", |b| {
        let mut pool = FixedBlockPool::<u64>::new();
        let mut ptrs = Vec::with_capacity(BATCH_SIZE);
        b.iter(|| {
            for i in 0..BATCH_SIZE {
                ptrs.push(pool.alloc(i as u64).unwrap());
            }
            unsafe { pool.deallocate_all(ptrs.drain(..)) };
        })
    });

    group.bench_function("ConcurrentBlockPool local", |b| {
        let mut pool = ConcurrentBlockPool::<u64>::new();
        let mut ptrs = Vec::with_capacity(BATCH_SIZE);
        b.iter(|| {
            for i in 0..BATCH_SIZE {
                ptrs.push(pool.alloc(i as u64).unwrap());
            }
            for p in ptrs.drain(..) {
                unsafe { pool.free(black_box(p)) };
            }
        })
    });

    group.finish();
}

fn bench_remote_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("Remote Free 1000");

    group.bench_function("ConcurrentBlockPool release from other thread", |b| {
        let mut pool = ConcurrentBlockPool::<u64>::new();
        b.iter_batched(
            || {
                (0..BATCH_SIZE)
                    .map(|i| pool.alloc(i as u64).unwrap().as_ptr() as usize)
                    .collect::<Vec<_>>()
            },
            |addrs| {
                thread::scope(|s| {
                    s.spawn(move || {
                        for addr in addrs {
                            if let Some(p) = NonNull::new(addr as *mut u64) {
                                unsafe { ConcurrentBlockPool::<u64>::release(p) };
                            }
                        }
                    });
                });
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_alloc_free, bench_remote_free);
criterion_main!(benches);
