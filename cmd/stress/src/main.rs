//! Stress harness
//!
//! Hammers a pool with short jobs from many submitter threads, mixes in
//! failures, then exercises both shutdown modes. Useful when hunting
//! for races under `TASKLET_QUEUE=lockfree` or `adaptive`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tasklet::{ErrorCode, ErrorInfo, Pool, SubmitOptions, TaskResult};

const SUBMITTERS: usize = 4;
const JOBS_PER_SUBMITTER: usize = 25_000;

fn main() -> TaskResult<()> {
    env_logger::init();
    let workers = num_cpus::get();
    println!(
        "stress: {} submitters x {} jobs on {} workers",
        SUBMITTERS, JOBS_PER_SUBMITTER, workers
    );

    let pool = Arc::new(Pool::builder("stress").workers(workers).build_and_start()?);
    let executed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for s in 0..SUBMITTERS {
        let pool = Arc::clone(&pool);
        let executed = Arc::clone(&executed);
        handles.push(thread::spawn(move || {
            let mut futures = Vec::with_capacity(JOBS_PER_SUBMITTER);
            for i in 0..JOBS_PER_SUBMITTER {
                let executed = Arc::clone(&executed);
                let fail = i % 1000 == 999; // sprinkle failures
                let future = pool
                    .submit(
                        move || {
                            executed.fetch_add(1, Ordering::Relaxed);
                            if fail {
                                Err(ErrorInfo::new(ErrorCode::JobExecutionFailed))
                            } else {
                                Ok(())
                            }
                        },
                        SubmitOptions::default(),
                    )
                    .expect("submit failed");
                futures.push(future);
            }
            let mut failures = 0;
            for future in futures {
                if future.get().is_err() {
                    failures += 1;
                }
            }
            println!("submitter {} done ({} failures observed)", s, failures);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let elapsed = start.elapsed();
    let total = SUBMITTERS * JOBS_PER_SUBMITTER;
    println!(
        "ran {} jobs in {:?} ({:.0} jobs/s), executed counter {}",
        total,
        elapsed,
        total as f64 / elapsed.as_secs_f64(),
        executed.load(Ordering::SeqCst),
    );
    let snapshot = pool.metrics_snapshot();
    println!(
        "metrics: executed={} failed={} avg wait={:?}",
        snapshot.tasks_executed,
        snapshot.tasks_failed,
        snapshot.average_wait(),
    );

    pool.stop(false)?;

    // Immediate-shutdown exercise: most of these are dropped on the
    // floor, but every future must still resolve.
    println!("\nimmediate shutdown exercise");
    let pool = Pool::builder("stress-drop").workers(2).build_and_start()?;
    let futures: Vec<_> = (0..1_000)
        .map(|_| {
            pool.submit(
                || {
                    thread::sleep(Duration::from_millis(1));
                    Ok(())
                },
                SubmitOptions::default(),
            )
            .expect("submit failed")
        })
        .collect();
    thread::sleep(Duration::from_millis(50));
    pool.stop(true)?;

    let (mut done, mut dropped, mut hung) = (0usize, 0usize, 0usize);
    for future in futures {
        match future.get_for(Duration::from_secs(1)) {
            Some(Ok(())) => done += 1,
            Some(Err(_)) => dropped += 1,
            None => hung += 1,
        }
    }
    println!("done={} dropped={} hung={}", done, dropped, hung);
    assert_eq!(hung, 0, "no future may hang after immediate stop");

    Ok(())
}
