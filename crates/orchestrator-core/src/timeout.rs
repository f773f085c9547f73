//! Per-task deferred timers.
//!
//! One pending timer per active task, keyed by [`TaskId`]. Built on
//! `tokio::spawn` + `JoinHandle::abort`, the Rust-native analogue of a
//! cancellable deferred job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::task::TaskId;

/// A callback invoked when a task's deadline elapses.
#[async_trait::async_trait]
pub trait TimeoutSink: Send + Sync {
    async fn on_timeout(&self, task_id: TaskId);
}

/// Tracks one pending timer per active task.
pub struct TimeoutManager {
    timers: Arc<DashMap<TaskId, JoinHandle<()>>>,
    sink: Arc<dyn TimeoutSink>,
}

impl TimeoutManager {
    pub fn new(sink: Arc<dyn TimeoutSink>) -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
            sink,
        }
    }

    /// Arm a timer for `task_id` with `deadline`. If the task is already
    /// armed, this is ignored (first-arm wins, so a deadline is never
    /// pushed out by a racing re-arm). If `deadline` has already passed the
    /// timeout fires immediately on the scheduler's task pool rather than
    /// synchronously in the caller.
    pub fn arm(&self, task_id: TaskId, deadline: DateTime<Utc>) {
        if self.timers.contains_key(&task_id) {
            tracing::debug!(task_id = %task_id, "timer already armed, ignoring re-arm");
            return;
        }

        let delay = (deadline - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);

        let sink = Arc::clone(&self.sink);
        let timers = Arc::clone(&self.timers);
        let fired_id = task_id.clone();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            sink.on_timeout(fired_id.clone()).await;
            // The timer fired on its own; drop its slot so `is_armed` and
            // memory usage both reflect that no timer is pending anymore.
            timers.remove(&fired_id);
        });

        self.timers.insert(task_id, handle);
    }

    /// Cancel the pending timer for `task_id`, if any. A no-op if it already
    /// fired or never existed. Best-effort: a timer whose callback has
    /// already started running completes to the end; the `on_timeout` it
    /// issues is tolerated as a no-op by the scheduler when the task is
    /// already terminal.
    pub fn cancel(&self, task_id: &TaskId) {
        if let Some((_, handle)) = self.timers.remove(task_id) {
            handle.abort();
        }
    }

    /// Whether a timer currently exists for `task_id`.
    pub fn is_armed(&self, task_id: &TaskId) -> bool {
        self.timers.contains_key(task_id)
    }

    /// Cancel every pending timer (shutdown).
    pub fn cancel_all(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicU32>);

    #[async_trait::async_trait]
    impl TimeoutSink for CountingSink {
        async fn on_timeout(&self, _task_id: TaskId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn past_deadline_fires_promptly() {
        let count = Arc::new(AtomicU32::new(0));
        let mgr = TimeoutManager::new(Arc::new(CountingSink(Arc::clone(&count))));

        let id = TaskId::new("ns", "wf", "job", "a");
        mgr.arm(id, Utc::now() - chrono::Duration::seconds(5));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_before_fire_prevents_callback() {
        let count = Arc::new(AtomicU32::new(0));
        let mgr = TimeoutManager::new(Arc::new(CountingSink(Arc::clone(&count))));

        let id = TaskId::new("ns", "wf", "job", "a");
        mgr.arm(id.clone(), Utc::now() + chrono::Duration::seconds(60));
        mgr.cancel(&id);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_arm_is_ignored_first_arm_wins() {
        let count = Arc::new(AtomicU32::new(0));
        let mgr = TimeoutManager::new(Arc::new(CountingSink(Arc::clone(&count))));

        let id = TaskId::new("ns", "wf", "job", "a");
        mgr.arm(id.clone(), Utc::now() - chrono::Duration::seconds(5));
        // Re-arm with a far-future deadline should be ignored; the original
        // (already past) deadline still governs.
        mgr.arm(id.clone(), Utc::now() + chrono::Duration::seconds(600));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_is_noop_when_never_armed() {
        let count = Arc::new(AtomicU32::new(0));
        let mgr = TimeoutManager::new(Arc::new(CountingSink(count)));
        mgr.cancel(&TaskId::new("ns", "wf", "job", "missing"));
    }
}
