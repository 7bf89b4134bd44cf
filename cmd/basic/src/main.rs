//! Basic tasklet example
//!
//! Demonstrates submitting closures, batch helpers, priorities and
//! cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tasklet::{JobType, Pool, SubmitOptions, TaskResult, TypedPool};

fn main() -> TaskResult<()> {
    env_logger::init();
    println!("=== tasklet basic example ===\n");

    let pool = Pool::builder("basic").workers(4).build_and_start()?;

    // Single submission
    let future = pool.submit(|| Ok(6 * 7), SubmitOptions::named("answer"))?;
    println!("single job result: {}", future.get()?);

    // Batch with a shared counter
    let counter = Arc::new(AtomicUsize::new(0));
    let works: Vec<_> = (0..1_000)
        .map(|_| {
            let c = Arc::clone(&counter);
            move || {
                c.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        })
        .collect();
    pool.submit_batch_all(works)?;
    println!("batch of 1000 incremented counter to {}", counter.load(Ordering::SeqCst));

    // Cancellation: the future resolves without the job's work running
    let doomed = pool.submit(
        || {
            std::thread::sleep(Duration::from_secs(10));
            Ok(())
        },
        SubmitOptions::named("doomed"),
    )?;
    doomed.cancel();
    match doomed.get() {
        Err(e) => println!("cancelled job reported: {}", e),
        Ok(()) => println!("cancelled job raced its cancellation"),
    }

    println!(
        "pool executed {} jobs ({} failed)",
        pool.tasks_executed(),
        pool.tasks_failed()
    );
    pool.stop(false)?;

    // Typed pool: background work ages upward instead of starving
    println!("\n=== typed pool ===");
    let typed = TypedPool::new("basic-typed");
    typed.add_universal_workers(2)?;
    typed.start()?;

    let rt = typed.submit(|| Ok("realtime"), JobType::RealTime, SubmitOptions::new())?;
    let bg = typed.submit(|| Ok("background"), JobType::Background, SubmitOptions::new())?;
    println!("typed results: {} / {}", rt.get()?, bg.get()?);
    typed.stop(false)?;

    Ok(())
}
