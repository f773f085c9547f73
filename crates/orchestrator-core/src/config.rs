//! Scheduler tunables.
//!
//! Plain struct with a `Default` -- no file format is parsed here, since
//! configuration parsing belongs to the bootstrap layer embedding this
//! crate, not the scheduling core itself.

use std::time::Duration;

/// Runtime-tunable knobs for [`crate::scheduler::Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often `deleteStaleTasks` sweeps for evictable jobs.
    pub purge_interval: Duration,
    /// How often the inbound status queue is polled.
    pub poll_interval: Duration,
    /// Worker pool size to hand to an embedding binary's own
    /// `tokio::runtime::Builder::worker_threads(...)` -- this crate spawns
    /// its background loops onto whatever runtime the caller already owns
    /// rather than owning a pool itself, so this is a sizing hint, not a
    /// knob this crate consumes directly.
    pub worker_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            purge_interval: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_millis(500),
            worker_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        }
    }
}
