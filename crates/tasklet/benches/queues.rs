//! Queue micro-benchmarks
//!
//! Single-threaded enqueue/dequeue cost of the job queues, with
//! crossbeam's `SegQueue` as an external baseline, plus end-to-end
//! pool throughput.

use criterion::{criterion_group, criterion_main, Criterion};

use crossbeam_queue::SegQueue;
use tasklet::{
    CallbackJob, LockFreeQueue, MutexQueue, Pool, Scheduler, SubmitOptions, when_all,
};

fn noop_job() -> Box<CallbackJob> {
    Box::new(CallbackJob::new(|| Ok(())))
}

fn bench_queue_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_roundtrip");

    group.bench_function("mutex", |b| {
        let queue = MutexQueue::unbounded();
        b.iter(|| {
            queue.schedule(noop_job()).unwrap();
            criterion::black_box(queue.try_next_job().unwrap());
        });
    });

    group.bench_function("lockfree", |b| {
        let queue = LockFreeQueue::new();
        b.iter(|| {
            queue.schedule(noop_job()).unwrap();
            criterion::black_box(queue.try_next_job().unwrap());
        });
    });

    group.bench_function("crossbeam_segqueue", |b| {
        let queue: SegQueue<Box<CallbackJob>> = SegQueue::new();
        b.iter(|| {
            queue.push(noop_job());
            criterion::black_box(queue.pop().unwrap());
        });
    });

    group.finish();
}

fn bench_pool_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_throughput");
    group.sample_size(10);

    group.bench_function("submit_1k_4_workers", |b| {
        let pool = Pool::builder("bench").workers(4).build_and_start().unwrap();
        b.iter(|| {
            let futures: Vec<_> = (0..1_000)
                .map(|_| pool.submit(|| Ok(()), SubmitOptions::default()).unwrap())
                .collect();
            when_all(futures).unwrap();
        });
        pool.stop(false).unwrap();
    });

    group.finish();
}

criterion_group!(benches, bench_queue_roundtrip, bench_pool_throughput);
criterion_main!(benches);
