//! Periodic cache expiry
//!
//! The sweeper wipes a whole namespace of the [`CacheStore`] on a fixed
//! interval. It runs as a background tokio task with an explicit lifecycle:
//! nothing is scheduled until [`Sweeper::start`] is called, and
//! [`Sweeper::stop`] cancels it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::store::CacheStore;

/// Counters shared between the handle and the background task
#[derive(Debug, Default)]
struct SweepStats {
    sweeps: AtomicU64,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

/// Running background task
#[derive(Debug)]
struct SweepTask {
    /// Dropping or signalling this ends the task
    shutdown_tx: mpsc::Sender<()>,
    interval: Duration,
}

/// Handle for the background expiry task
///
/// Cloning shares the same task.
#[derive(Debug, Clone, Default)]
pub struct Sweeper {
    task: Arc<Mutex<Option<SweepTask>>>,
    stats: Arc<SweepStats>,
}

impl Sweeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts sweeping `namespace` every `interval`
    ///
    /// The first sweep happens one full interval after starting. A running
    /// task is stopped and replaced. A zero interval leaves the sweeper
    /// stopped and returns false.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    /// * `store` - The store to sweep
    /// * `namespace` - The partition wiped on every tick (e.g. "urls")
    /// * `interval` - Time between sweeps
    ///
    /// # Returns
    /// * `true` if the sweeper is now running
    /// * `false` if `interval` is zero
    pub fn start(&self, store: CacheStore, namespace: impl Into<String>, interval: Duration) -> bool {
        self.stop();
        if interval.is_zero() {
            warn!("Refusing to start cache sweeper with a zero interval");
            return false;
        }

        let namespace = namespace.into();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let stats = Arc::clone(&self.stats);

        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        info!(namespace = %namespace, interval_ms, "Starting cache sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the first tick (immediate)
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep_once(&store, &namespace, &stats).await;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
            debug!(namespace = %namespace, "Cache sweeper stopped");
        });

        *self.task.lock() = Some(SweepTask {
            shutdown_tx,
            interval,
        });
        true
    }

    /// Stops the background task; does nothing if it is not running
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            // A full channel means a shutdown is already queued
            let _ = task.shutdown_tx.try_send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Interval of the running task, if any
    pub fn interval(&self) -> Option<Duration> {
        self.task.lock().as_ref().map(|task| task.interval)
    }

    /// Number of sweeps completed since this sweeper was created
    pub fn sweep_count(&self) -> u64 {
        self.stats.sweeps.load(Ordering::Relaxed)
    }

    /// When the most recent sweep finished
    pub fn last_sweep(&self) -> Option<DateTime<Utc>> {
        *self.stats.last_sweep.lock()
    }
}

/// Runs one sweep. Failures are logged and never escape the timer loop.
async fn sweep_once(store: &CacheStore, namespace: &str, stats: &SweepStats) {
    match store.delete_all(namespace).await {
        Ok(deleted) => {
            debug!(namespace, deleted, "Cache sweep completed");
        }
        Err(e) => {
            warn!(namespace, error = %e, "Cache sweep failed");
        }
    }
    stats.sweeps.fetch_add(1, Ordering::Relaxed);
    *stats.last_sweep.lock() = Some(Utc::now());
}
