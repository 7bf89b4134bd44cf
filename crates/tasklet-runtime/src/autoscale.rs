//! Autoscaler
//!
//! A background observer samples worker utilisation and queue lag every
//! `sample_interval`, and grows or shrinks the worker set once a
//! threshold holds for enough consecutive samples. Decisions are
//! emitted as [`ScalingDecision`] values for observability; shrinking
//! cancels the longest-idle workers' tokens and lets them retire on
//! their own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::pool::PoolCore;

/// Autoscaling thresholds and pacing
#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    pub min_workers: usize,
    pub max_workers: usize,

    /// Average utilisation at or above this scales up
    pub scale_up_threshold: f64,

    /// Average utilisation at or below this scales down
    pub scale_down_threshold: f64,

    pub sample_interval: Duration,

    /// Consecutive high samples required before growing
    pub cool_up: u32,

    /// Consecutive low samples required before shrinking
    pub cool_down: u32,

    /// Workers added or retired per decision
    pub scale_step: usize,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: num_cpus::get() * 2,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.2,
            sample_interval: Duration::from_millis(100),
            cool_up: 3,
            cool_down: 5,
            scale_step: 1,
        }
    }
}

/// Which way a decision went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
    Hold,
}

/// One autoscaling decision, emitted every sample
#[derive(Debug, Clone)]
pub struct ScalingDecision {
    pub direction: ScaleDirection,

    /// Worker count the decision aims for
    pub target: usize,

    pub reason: String,
}

/// Streak state carried between samples
#[derive(Default)]
pub(crate) struct Streaks {
    high: u32,
    low: u32,
}

/// Pure decision function; the sampling thread feeds it measurements
pub(crate) fn decide(
    avg_utilisation: f64,
    alive: usize,
    queue_lag: f64,
    config: &AutoscalerConfig,
    streaks: &mut Streaks,
) -> ScalingDecision {
    if avg_utilisation >= config.scale_up_threshold {
        streaks.high += 1;
        streaks.low = 0;
    } else if avg_utilisation <= config.scale_down_threshold && queue_lag < 1.0 {
        streaks.low += 1;
        streaks.high = 0;
    } else {
        streaks.high = 0;
        streaks.low = 0;
    }

    if streaks.high >= config.cool_up && alive < config.max_workers {
        streaks.high = 0;
        let target = (alive + config.scale_step).min(config.max_workers);
        return ScalingDecision {
            direction: ScaleDirection::Up,
            target,
            reason: format!(
                "utilisation {:.2} >= {:.2} for {} samples, queue lag {:.1}",
                avg_utilisation, config.scale_up_threshold, config.cool_up, queue_lag
            ),
        };
    }

    if streaks.low >= config.cool_down && alive > config.min_workers {
        streaks.low = 0;
        let target = alive
            .saturating_sub(config.scale_step)
            .max(config.min_workers);
        return ScalingDecision {
            direction: ScaleDirection::Down,
            target,
            reason: format!(
                "utilisation {:.2} <= {:.2} for {} samples",
                avg_utilisation, config.scale_down_threshold, config.cool_down
            ),
        };
    }

    ScalingDecision {
        direction: ScaleDirection::Hold,
        target: alive,
        reason: format!("utilisation {:.2}, queue lag {:.1}", avg_utilisation, queue_lag),
    }
}

/// Average utilisation across alive workers, plus the alive count
///
/// `previous` carries per-worker (busy, idle) readings between calls so
/// repeated sampling sees deltas; a fresh map yields lifetime totals.
fn measure(core: &PoolCore, previous: &mut HashMap<usize, (u64, u64)>) -> (f64, usize) {
    let workers = core.workers.lock().unwrap();
    let mut busy_delta = 0u64;
    let mut idle_delta = 0u64;
    let mut alive = 0usize;
    for handle in workers.iter() {
        if handle.shared.cancel_token().is_cancelled() {
            continue;
        }
        alive += 1;
        let busy = handle.shared.busy_ns();
        let idle = handle.shared.idle_ns();
        let (last_busy, last_idle) = previous
            .insert(handle.shared.id(), (busy, idle))
            .unwrap_or((0, 0));
        busy_delta += busy.saturating_sub(last_busy);
        idle_delta += idle.saturating_sub(last_idle);
    }
    let total = busy_delta + idle_delta;
    let avg = if total == 0 {
        0.0
    } else {
        busy_delta as f64 / total as f64
    };
    (avg, alive)
}

struct ScalerShared {
    stop: AtomicBool,
    scale_ups: AtomicU64,
    scale_downs: AtomicU64,
    last_decision: Mutex<Option<ScalingDecision>>,
}

/// Handle to a running autoscaler thread
pub struct Autoscaler {
    core: Arc<PoolCore>,
    config: AutoscalerConfig,
    shared: Arc<ScalerShared>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Autoscaler {
    pub(crate) fn start(core: Arc<PoolCore>, config: AutoscalerConfig) -> Self {
        let shared = Arc::new(ScalerShared {
            stop: AtomicBool::new(false),
            scale_ups: AtomicU64::new(0),
            scale_downs: AtomicU64::new(0),
            last_decision: Mutex::new(None),
        });

        let thread_core = Arc::clone(&core);
        let thread_config = config.clone();
        let thread_shared = Arc::clone(&shared);
        let name = format!("{}-autoscaler", core.name);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run_sampler(thread_core, thread_config, thread_shared))
            .expect("failed to spawn autoscaler thread");

        Self {
            core,
            config,
            shared,
            handle: Some(handle),
        }
    }

    /// Evaluate the scaling rules against the pool's current state,
    /// without waiting for the next sample
    ///
    /// Utilisation is measured over the workers' lifetimes rather than
    /// the last interval, and the cooldown streaks are treated as
    /// satisfied: the answer is what the sampler would decide if this
    /// reading persisted. Nothing is applied or recorded.
    pub fn evaluate_now(&self) -> ScalingDecision {
        let mut totals = HashMap::new();
        let (avg_utilisation, alive) = measure(&self.core, &mut totals);
        let queue_lag = if alive == 0 {
            0.0
        } else {
            self.core.queue.size() as f64 / alive as f64
        };
        let mut streaks = Streaks {
            high: self.config.cool_up.saturating_sub(1),
            low: self.config.cool_down.saturating_sub(1),
        };
        decide(avg_utilisation, alive, queue_lag, &self.config, &mut streaks)
    }

    /// Most recent decision, Hold included
    pub fn last_decision(&self) -> Option<ScalingDecision> {
        self.shared.last_decision.lock().unwrap().clone()
    }

    pub fn scale_ups(&self) -> u64 {
        self.shared.scale_ups.load(Ordering::Relaxed)
    }

    pub fn scale_downs(&self) -> u64 {
        self.shared.scale_downs.load(Ordering::Relaxed)
    }

    /// Stop the sampling thread and wait for it
    pub fn stop(mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Autoscaler {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_sampler(core: Arc<PoolCore>, config: AutoscalerConfig, shared: Arc<ScalerShared>) {
    let mut streaks = Streaks::default();
    // Previous (busy, idle) per worker id, for delta-based utilisation.
    let mut previous: HashMap<usize, (u64, u64)> = HashMap::new();

    while !shared.stop.load(Ordering::Acquire) {
        // Sleep in slices so stop() is honored promptly.
        let mut remaining = config.sample_interval;
        while remaining > Duration::ZERO && !shared.stop.load(Ordering::Acquire) {
            let slice = remaining.min(Duration::from_millis(10));
            thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        let (avg_utilisation, alive) = measure(&core, &mut previous);
        if alive == 0 {
            continue;
        }

        let queue_lag = core.queue.size() as f64 / alive as f64;
        let decision = decide(avg_utilisation, alive, queue_lag, &config, &mut streaks);

        match decision.direction {
            ScaleDirection::Up => {
                let add = decision.target.saturating_sub(alive);
                log::info!(
                    "autoscaler growing {} -> {}: {}",
                    alive,
                    decision.target,
                    decision.reason
                );
                for _ in 0..add {
                    if core.spawn_worker().is_err() {
                        break;
                    }
                }
                shared.scale_ups.fetch_add(1, Ordering::Relaxed);
            }
            ScaleDirection::Down => {
                let remove = alive.saturating_sub(decision.target);
                log::info!(
                    "autoscaler shrinking {} -> {}: {}",
                    alive,
                    decision.target,
                    decision.reason
                );
                core.retire_workers(remove);
                shared.scale_downs.fetch_add(1, Ordering::Relaxed);
            }
            ScaleDirection::Hold => {}
        }

        *shared.last_decision.lock().unwrap() = Some(decision);
    }
}
