//! Expiry Sweeper Background Task
//!
//! Entries that are written once and never read again are only discovered as
//! expired when someone looks them up. This task walks the memory tier on a
//! fixed interval and drops every expired entry, which keeps the tier from
//! filling with dead data between evictions.
//!
//! # Example
//!
//! ```ignore
//! let engine = CacheEngine::new(config, store, clock)?;
//! let sweeper = engine.spawn_sweeper();
//!
//! // Later, on shutdown
//! if let Some(sweeper) = sweeper {
//!     let snapshot = sweeper.shutdown().await;
//!     tracing::info!(swept = snapshot.entries_swept, "Sweeper stopped");
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::engine::CacheEngine;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweep activity.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Sweep passes completed
    pub sweeps: AtomicU64,

    /// Expired entries removed across all passes
    pub entries_swept: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            entries_swept: self.entries_swept.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweep metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSnapshot {
    pub sweeps: u64,
    pub entries_swept: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Sweep `engine` every `period` until shutdown is signalled or the sender
/// is dropped. The first pass runs one full period after start.
pub async fn sweep_task(
    engine: CacheEngine,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let metrics = Arc::new(SweepMetrics::new());

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = period.as_secs(), "Cache sweeper started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache sweeper shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                let swept = engine.sweep_expired();
                metrics.sweeps.fetch_add(1, Ordering::Relaxed);
                metrics.entries_swept.fetch_add(swept as u64, Ordering::Relaxed);
                if swept == 0 {
                    tracing::trace!("Sweep found nothing expired");
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweeps = snapshot.sweeps,
        entries_swept = snapshot.entries_swept,
        "Cache sweeper completed"
    );

    metrics
}

/// Handle to a running sweeper. Dropping it also stops the task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Arc<SweepMetrics>>,
}

impl SweeperHandle {
    /// Signal shutdown and wait for the task to finish.
    pub async fn shutdown(self) -> SweepSnapshot {
        let _ = self.shutdown_tx.send(true);
        match self.handle.await {
            Ok(metrics) => metrics.snapshot(),
            Err(e) => {
                tracing::error!(error = %e, "Cache sweeper task failed");
                SweepSnapshot::default()
            }
        }
    }
}

impl CacheEngine {
    /// Start the periodic sweeper on the current tokio runtime.
    ///
    /// Returns `None` when sweeping is disabled in the configuration.
    pub fn spawn_sweeper(&self) -> Option<SweeperHandle> {
        if !self.config().sweep_enabled {
            tracing::debug!("Cache sweeper disabled");
            return None;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_task(
            self.clone(),
            self.config().sweep_interval,
            shutdown_rx,
        ));
        Some(SweeperHandle {
            shutdown_tx,
            handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys;
    use crate::cache::options::CacheOptions;
    use crate::cache::store::MemoryStore;
    use stride_core::{CacheConfig, ManualClock, UserId};

    fn engine(config: CacheConfig) -> (CacheEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let engine = CacheEngine::new(config, Arc::new(MemoryStore::default()), clock.clone())
            .expect("engine should build");
        (engine, clock)
    }

    #[test]
    fn test_disabled_sweeper_is_not_spawned() {
        let (engine, _) = engine(CacheConfig::new().with_sweep(false));
        assert!(engine.spawn_sweeper().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let (engine, clock) =
            engine(CacheConfig::new().with_sweep_interval(Duration::from_secs(60)));
        let user = UserId::new("u1").expect("valid user id");

        engine.set(
            &keys::goals(&user),
            &1u32,
            &CacheOptions::new().with_ttl(Duration::from_secs(10)),
        );
        engine.set(
            &keys::skills(&user),
            &2u32,
            &CacheOptions::new().with_ttl(Duration::from_secs(600)),
        );
        clock.advance(Duration::from_secs(30));

        let sweeper = engine.spawn_sweeper().expect("sweeper enabled");
        tokio::time::sleep(Duration::from_secs(61)).await;

        let snapshot = sweeper.shutdown().await;
        assert!(snapshot.sweeps >= 1);
        assert_eq!(snapshot.entries_swept, 1);
        assert_eq!(engine.get_stats().total_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_sweeper() {
        let metrics_probe = {
            let (engine, _) = engine(CacheConfig::default());
            let (tx, rx) = watch::channel(false);
            let task = tokio::spawn(sweep_task(engine, Duration::from_secs(1), rx));
            drop(tx);
            task
        };
        let metrics = metrics_probe.await.expect("task should finish");
        assert_eq!(metrics.snapshot().sweeps, 0);
    }
}
