//! Resource tracking and termination signalling.
//!
//! The [`ResourceTracker`] samples every watched worker's memory gauge on a
//! fixed interval and reports offenders on the shared termination channel.
//! It never kills anything itself; the manager owns the reaction, so there
//! is exactly one teardown path for every failure class.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::worker::MemoryGauge;

/// Consecutive over-limit samples required before a memory termination is
/// reported. A single spike between samples is forgiven.
const MEMORY_STRIKES: u8 = 2;

/// Why a worker was condemned.
#[derive(Debug, Clone)]
pub enum TerminationReason {
    /// Sampled memory stayed above the limit for consecutive samples.
    MemoryExceeded { used: u64, limit: u64 },
    /// A command execution outran its watchdog.
    Timeout { limit_ms: u64 },
    /// The worker reported an uncaught failure and exited.
    WorkerFatal {
        message: String,
        stack: Option<String>,
    },
    /// A liveness probe went unanswered.
    PingFailed,
}

/// A termination verdict, routed to the manager over the shared channel.
#[derive(Debug)]
pub struct Termination {
    pub plugin_id: String,
    pub reason: TerminationReason,
}

/// What to do with a worker whose liveness probe fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingPolicy {
    /// Move the worker to the error state and tear it down.
    #[default]
    MarkError,
    /// Restart the worker from its recorded source, up to a cap, then fall
    /// back to [`PingPolicy::MarkError`].
    Restart { max_attempts: u32 },
}

/// Tunable thresholds, passed in explicitly at construction.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How often watched gauges are sampled.
    pub sample_interval: Duration,
    /// Per-plugin memory ceiling in bytes.
    pub max_memory: u64,
    /// Watchdog applied to every command execution.
    pub response_timeout: Duration,
    /// Liveness probe interval; `None` disables probing.
    pub ping_interval: Option<Duration>,
    pub ping_policy: PingPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            max_memory: 128 * 1024 * 1024,
            response_timeout: Duration::from_secs(5),
            ping_interval: None,
            ping_policy: PingPolicy::default(),
        }
    }
}

struct WatchEntry {
    gauge: MemoryGauge,
    strikes: u8,
}

/// Samples watched workers and reports limit violations.
pub struct ResourceTracker {
    entries: Arc<DashMap<String, WatchEntry>>,
    config: TrackerConfig,
    sampler: JoinHandle<()>,
}

impl ResourceTracker {
    /// Start the sampling task. Verdicts go out on `terminations`.
    pub fn spawn(config: TrackerConfig, terminations: mpsc::Sender<Termination>) -> Self {
        let entries: Arc<DashMap<String, WatchEntry>> = Arc::new(DashMap::new());
        let sampler = tokio::spawn(sample_loop(
            Arc::clone(&entries),
            config.clone(),
            terminations,
        ));
        Self {
            entries,
            config,
            sampler,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Begin sampling a worker's gauge.
    pub fn watch(&self, plugin_id: impl Into<String>, gauge: MemoryGauge) {
        self.entries
            .insert(plugin_id.into(), WatchEntry { gauge, strikes: 0 });
    }

    /// Stop sampling a worker. Idempotent.
    pub fn unwatch(&self, plugin_id: &str) {
        self.entries.remove(plugin_id);
    }

    #[cfg(test)]
    fn is_watching(&self, plugin_id: &str) -> bool {
        self.entries.contains_key(plugin_id)
    }
}

impl Drop for ResourceTracker {
    fn drop(&mut self) {
        self.sampler.abort();
    }
}

async fn sample_loop(
    entries: Arc<DashMap<String, WatchEntry>>,
    config: TrackerConfig,
    terminations: mpsc::Sender<Termination>,
) {
    let mut interval = tokio::time::interval(config.sample_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let mut condemned = Vec::new();
        for mut entry in entries.iter_mut() {
            let used = entry.gauge.get();
            if used > config.max_memory {
                entry.strikes += 1;
                tracing::warn!(
                    plugin = %entry.key(),
                    used,
                    limit = config.max_memory,
                    strikes = entry.strikes,
                    "memory sample over limit"
                );
                if entry.strikes >= MEMORY_STRIKES {
                    condemned.push((entry.key().clone(), used));
                }
            } else {
                entry.strikes = 0;
            }
        }

        for (plugin_id, used) in condemned {
            entries.remove(&plugin_id);
            let verdict = Termination {
                plugin_id,
                reason: TerminationReason::MemoryExceeded {
                    used,
                    limit: config.max_memory,
                },
            };
            if terminations.send(verdict).await.is_err() {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrackerConfig {
        TrackerConfig {
            sample_interval: Duration::from_millis(100),
            max_memory: 1000,
            ..TrackerConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_over_limit_is_condemned() {
        let (tx, mut rx) = mpsc::channel(8);
        let tracker = ResourceTracker::spawn(config(), tx);

        let gauge = MemoryGauge::new();
        gauge.set(5000);
        tracker.watch("greedy", gauge);

        let verdict = rx.recv().await.unwrap();
        assert_eq!(verdict.plugin_id, "greedy");
        assert!(matches!(
            verdict.reason,
            TerminationReason::MemoryExceeded {
                used: 5000,
                limit: 1000
            }
        ));

        // Condemned workers are dropped from the watch list.
        assert!(!tracker.is_watching("greedy"));
    }

    #[tokio::test(start_paused = true)]
    async fn single_spike_is_forgiven() {
        let (tx, mut rx) = mpsc::channel(8);
        let tracker = ResourceTracker::spawn(config(), tx);

        let gauge = MemoryGauge::new();
        gauge.set(5000);
        tracker.watch("spiky", gauge.clone());

        // One over-limit sample, then recovery before the second.
        tokio::time::sleep(Duration::from_millis(50)).await;
        gauge.set(100);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(rx.try_recv().is_err());
        assert!(tracker.is_watching("spiky"));
    }

    #[tokio::test(start_paused = true)]
    async fn under_limit_is_never_condemned() {
        let (tx, mut rx) = mpsc::channel(8);
        let tracker = ResourceTracker::spawn(config(), tx);

        let gauge = MemoryGauge::new();
        gauge.set(999);
        tracker.watch("modest", gauge);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unwatch_stops_sampling() {
        let (tx, mut rx) = mpsc::channel(8);
        let tracker = ResourceTracker::spawn(config(), tx);

        let gauge = MemoryGauge::new();
        gauge.set(5000);
        tracker.watch("leaving", gauge);
        tracker.unwatch("leaving");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }
}
