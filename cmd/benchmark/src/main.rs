//! Throughput benchmark
//!
//! Measures pool submission throughput across queue kinds and compares
//! the raw Michael-Scott queue against crossbeam's `SegQueue` under
//! MPMC load. Numbers are rough; use the criterion benches in the
//! `tasklet` crate for statistically sound comparisons.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_queue::SegQueue;
use tasklet::{
    when_all, CallbackJob, LockFreeQueue, Pool, QueueKind, Scheduler, SubmitOptions, TaskResult,
};

const POOL_JOBS: usize = 200_000;
const QUEUE_OPS: usize = 100_000;

fn bench_pool(kind: QueueKind) -> TaskResult<()> {
    let workers = num_cpus::get();
    let pool = Pool::builder("bench")
        .workers(workers)
        .with_queue(kind)
        .build_and_start()?;

    let counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let futures: Vec<_> = (0..POOL_JOBS)
        .map(|_| {
            let c = Arc::clone(&counter);
            pool.submit(
                move || {
                    c.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                },
                SubmitOptions::default(),
            )
            .expect("submit failed")
        })
        .collect();
    when_all(futures)?;
    let elapsed = start.elapsed();

    assert_eq!(counter.load(Ordering::SeqCst), POOL_JOBS);
    println!(
        "pool[{:?}] {} jobs, {} workers: {:?} ({:.0} jobs/s)",
        kind,
        POOL_JOBS,
        workers,
        elapsed,
        POOL_JOBS as f64 / elapsed.as_secs_f64(),
    );
    pool.stop(false)
}

fn bench_raw_queues() {
    let producers = 4;
    let consumers = 4;

    // Our Michael-Scott queue
    let queue = Arc::new(LockFreeQueue::new());
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..producers {
        let q = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            for _ in 0..QUEUE_OPS / 4 {
                q.schedule(Box::new(CallbackJob::new(|| Ok(())))).unwrap();
            }
        }));
    }
    let consumed = Arc::new(AtomicUsize::new(0));
    for _ in 0..consumers {
        let q = Arc::clone(&queue);
        let c = Arc::clone(&consumed);
        handles.push(thread::spawn(move || loop {
            match q.next_job() {
                Ok(_) => {
                    c.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => break,
            }
        }));
    }
    for h in handles.drain(..producers) {
        h.join().unwrap();
    }
    while consumed.load(Ordering::Relaxed) < QUEUE_OPS {
        thread::yield_now();
    }
    queue.stop();
    for h in handles {
        h.join().unwrap();
    }
    let ours = start.elapsed();

    // crossbeam SegQueue baseline
    let queue: Arc<SegQueue<usize>> = Arc::new(SegQueue::new());
    let stop = Arc::new(AtomicBool::new(false));
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..producers {
        let q = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            for i in 0..QUEUE_OPS / 4 {
                q.push(i);
            }
        }));
    }
    let consumed = Arc::new(AtomicUsize::new(0));
    for _ in 0..consumers {
        let q = Arc::clone(&queue);
        let c = Arc::clone(&consumed);
        let stop = Arc::clone(&stop);
        handles.push(thread::spawn(move || loop {
            match q.pop() {
                Some(_) => {
                    c.fetch_add(1, Ordering::Relaxed);
                }
                None if stop.load(Ordering::Acquire) => break,
                None => thread::yield_now(),
            }
        }));
    }
    for h in handles.drain(..producers) {
        h.join().unwrap();
    }
    while consumed.load(Ordering::Relaxed) < QUEUE_OPS {
        thread::yield_now();
    }
    stop.store(true, Ordering::Release);
    for h in handles {
        h.join().unwrap();
    }
    let theirs = start.elapsed();

    println!(
        "raw MPMC ({} ops, {}p/{}c): michael-scott {:?}, crossbeam SegQueue {:?}",
        QUEUE_OPS, producers, consumers, ours, theirs
    );
}

fn main() -> TaskResult<()> {
    env_logger::init();
    bench_pool(QueueKind::Mutex)?;
    bench_pool(QueueKind::LockFree)?;
    bench_pool(QueueKind::Adaptive)?;
    bench_raw_queues();
    Ok(())
}
