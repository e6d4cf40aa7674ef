use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::thread;
use tidepool::BoundedRingQueue;

const ITEMS: u64 = 10_000;

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("Ring Queue single thread");

    group.bench_function("push + pop 64", |b| {
        let (mut producer, consumer) = BoundedRingQueue::with_capacity(64);
        b.iter(|| {
            for i in 0..64u64 {
                let _ = producer.push(i);
            }
            while let Some(v) = consumer.pop() {
                black_box(v);
            }
        })
    });

    group.finish();
}

fn bench_consumers(c: &mut Criterion) {
    let mut group = c.benchmark_group("Ring Queue 10k items");

    for consumers in [1usize, 2, 4] {
        group.bench_function(format!("{consumers} consumers"), |b| {
            b.iter(|| {
                let (mut producer, consumer) = BoundedRingQueue::with_capacity(1024);
                thread::scope(|s| {
                    for _ in 0..consumers {
                        let consumer = consumer.clone();
                        s.spawn(move || loop {
                            match consumer.pop() {
                                Some(u64::MAX) => break,
                                Some(v) => {
                                    black_box(v);
                                }
                                None => std::hint::spin_loop(),
                            }
                        });
                    }
                    let stops = std::iter::repeat(u64::MAX).take(consumers);
                    for mut item in (0..ITEMS).chain(stops) {
                        while let Err(back) = producer.push(item) {
                            item = back;
                            std::hint::spin_loop();
                        }
                    }
                });
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_consumers);
criterion_main!(benches);
