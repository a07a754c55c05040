//! Background Expiry Sweeper
//!
//! This module implements "active expiry": a background task that removes
//! expired keys nobody reads anymore. Lazy expiry alone would leave such keys
//! in memory forever.
//!
//! ## Design
//!
//! Each cycle the sweeper:
//! 1. Sleeps for the current interval (or until shutdown is requested)
//! 2. Visits `shards_per_cycle` shards in round-robin order
//! 3. In each shard, samples up to `sample_size` random keys that carry a TTL
//!    and removes the expired ones
//! 4. Adjusts its interval based on the fraction of the sample that expired
//!
//! Shards locked by client traffic are skipped and picked up on a later cycle.
//!
//! ## Adaptive Frequency
//!
//! If a large fraction of the sample was expired, the sweeper immediately runs
//! another pass (up to `max_passes`) and halves its interval. If almost nothing
//! expired, it doubles the interval up to `max_interval`.

use crate::storage::{StorageEngine, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryConfig {
    /// Base interval between sweeps (default: 100ms)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 10ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 1s)
    pub max_interval: Duration,

    /// Volatile keys sampled per shard visit (default: 20)
    pub sample_size: usize,

    /// Shards visited per pass (default: 16)
    pub shards_per_cycle: usize,

    /// Extra passes allowed in one cycle while the expired fraction stays high
    pub max_passes: usize,

    /// If this fraction of sampled keys are expired, speed up sweeping
    pub speedup_threshold: f64,

    /// If this fraction of sampled keys are expired, slow down sweeping
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            sample_size: 20,
            shards_per_cycle: 16,
            max_passes: 4,
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

/// Totals for one sweeper cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub passes: usize,
    pub sampled: usize,
    pub expired: usize,
    /// Shards skipped because their lock was held
    pub busy_shards: usize,
}

impl CycleReport {
    /// Fraction of sampled keys that were expired (0 when nothing was sampled).
    pub fn expired_ratio(&self) -> f64 {
        if self.sampled == 0 {
            0.0
        } else {
            self.expired as f64 / self.sampled as f64
        }
    }
}

/// Runs one sweeper cycle against `engine`.
///
/// Runs at least one pass over `shards_per_cycle` shards and keeps going,
/// up to `max_passes`, while the expired fraction of a pass is above
/// `speedup_threshold`.
pub fn run_expiry_cycle(engine: &StorageEngine, config: &ExpiryConfig) -> CycleReport {
    let mut report = CycleReport::default();
    let shards = config.shards_per_cycle.clamp(1, engine.shard_count());

    for _ in 0..config.max_passes.max(1) {
        let mut pass = CycleReport::default();

        for _ in 0..shards {
            match engine.sweep_next_shard(config.sample_size) {
                Ok(sample) => {
                    pass.sampled += sample.sampled;
                    pass.expired += sample.expired;
                }
                Err(StorageError::ShardBusy { shard }) => {
                    trace!(shard, "Shard busy, skipping until next cycle");
                    pass.busy_shards += 1;
                }
            }
        }

        report.passes += 1;
        report.sampled += pass.sampled;
        report.expired += pass.expired;
        report.busy_shards += pass.busy_shards;

        if pass.expired_ratio() <= config.speedup_threshold {
            break;
        }
    }

    engine.record_sweep_cycle();
    report
}

/// Computes the delay before the next cycle from the last cycle's results.
pub fn next_interval(current: Duration, report: &CycleReport, config: &ExpiryConfig) -> Duration {
    let ratio = report.expired_ratio();

    if ratio > config.speedup_threshold {
        (current / 2).max(config.min_interval)
    } else if ratio < config.slowdown_threshold {
        (current * 2).min(config.max_interval)
    } else {
        current
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,

    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use chronokv::storage::{StorageEngine, ExpirySweeper, ExpiryConfig};
    /// use std::sync::Arc;
    ///
    /// let engine = Arc::new(StorageEngine::new());
    /// let sweeper = ExpirySweeper::start(engine, ExpiryConfig::default());
    ///
    /// // Wait for the current cycle to finish and the task to exit
    /// sweeper.shutdown().await;
    /// ```
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = config.base_interval.as_millis() as u64,
            sample_size = config.sample_size,
            shards_per_cycle = config.shards_per_cycle,
            "Background expiry sweeper started"
        );
        let task = tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the sweeper to stop. Does not wait for it.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            self.shutdown_tx.send_replace(true);
            info!("Background expiry sweeper stopped");
        }
    }

    /// Returns true once the sweeper task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Stops the sweeper and waits for the task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(error = %e, "Expiry sweeper task ended abnormally");
            }
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let report = run_expiry_cycle(&engine, &config);
        let next = next_interval(current_interval, &report, &config);

        if next < current_interval {
            debug!(
                expired = report.expired,
                sampled = report.sampled,
                rate = %format!("{:.2}%", report.expired_ratio() * 100.0),
                new_interval_ms = next.as_millis() as u64,
                "High expiry rate, speeding up sweeper"
            );
        } else if next > current_interval {
            trace!(
                new_interval_ms = next.as_millis() as u64,
                "Low expiry rate, slowing down sweeper"
            );
        }
        current_interval = next;

        if report.expired > 0 {
            debug!(
                expired = report.expired,
                passes = report.passes,
                busy_shards = report.busy_shards,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        }
    }
}

/// Starts the expiry sweeper with default configuration.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}
