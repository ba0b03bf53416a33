//! Benchmarks for the blocking channel.
//!
//! Compares strand-channel against crossbeam-channel (bounded).

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::thread;
use strand_channel::Channel;

// ============================================================================
// Uncontended round-trip latency
// ============================================================================

fn bench_channel_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_latency");

    group.bench_function("strand_channel/u64", |b| {
        let ch = Channel::<u64>::new(1024);
        b.iter(|| {
            ch.try_push(black_box(42u64)).unwrap();
            black_box(ch.try_pop().unwrap())
        });
    });

    group.bench_function("crossbeam_channel/u64", |b| {
        let (tx, rx) = crossbeam_channel::bounded::<u64>(1024);
        b.iter(|| {
            tx.try_send(black_box(42u64)).unwrap();
            black_box(rx.try_recv().unwrap())
        });
    });

    group.finish();
}

// ============================================================================
// Cross-thread throughput
// ============================================================================

fn bench_channel_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_throughput");

    const COUNT: u64 = 100_000;
    group.throughput(Throughput::Elements(COUNT));

    group.bench_function("strand_channel/u64", |b| {
        b.iter(|| {
            let ch = Channel::<u64>::new(1024);
            let producer = ch.clone();

            let handle = thread::spawn(move || {
                for i in 0..COUNT {
                    producer.push(i).unwrap();
                }
                producer.close();
            });

            let mut received = 0;
            while ch.pop().is_ok() {
                received += 1;
            }
            assert_eq!(received, COUNT);

            handle.join().unwrap();
        });
    });

    group.bench_function("crossbeam_channel/u64", |b| {
        b.iter(|| {
            let (tx, rx) = crossbeam_channel::bounded::<u64>(1024);

            let handle = thread::spawn(move || {
                for i in 0..COUNT {
                    tx.send(i).unwrap();
                }
            });

            let mut received = 0;
            while rx.recv().is_ok() {
                received += 1;
            }
            assert_eq!(received, COUNT);

            handle.join().unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_channel_latency, bench_channel_throughput);
criterion_main!(benches);
