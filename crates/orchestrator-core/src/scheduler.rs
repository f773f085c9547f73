//! Scheduling state machine.
//!
//! `Scheduler` is the orchestrator: it accepts submissions, drives state
//! transitions through [`TaskProvider`], dispatches ready tasks onto the
//! outbound [`Producer`], and consumes status updates from the inbound
//! [`Consumer`]. A single coarse monitor (`tokio::sync::Mutex<()>`)
//! serializes every mutating operation. An `Arc<SchedulerInner>` is shared
//! across three background loops -- the status-queue poller, the
//! timeout-firing consumer, and the periodic purge sweep -- each gated by
//! the same shutdown flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::error::{reserved_messages, OrchestratorError, Result};
use crate::interpolate::ContextInterpolator;
use crate::provider::TaskProvider;
use crate::task::{Status, StatusMessage, Task, TaskId};
use crate::timeout::{TimeoutManager, TimeoutSink};
use crate::traits::{Consumer, NamespaceService, Producer, TaskStore};

const STATUS_QUEUE: &str = "taskStatusQueue";

/// Forwards a fired timer onto an internal channel so the firing callback
/// runs on the scheduler's own background loop rather than on whichever
/// tokio task happened to own the timer.
struct TimeoutChannelSink {
    tx: mpsc::UnboundedSender<TaskId>,
}

#[async_trait::async_trait]
impl TimeoutSink for TimeoutChannelSink {
    async fn on_timeout(&self, task_id: TaskId) {
        let _ = self.tx.send(task_id);
    }
}

/// Cheaply cloneable scheduling core. Every mutating method acquires the
/// coarse monitor before touching [`TaskProvider`] state.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    provider: TaskProvider,
    timeout_mgr: TimeoutManager,
    timeout_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskId>>>,
    producer: Arc<dyn Producer>,
    consumer: Arc<dyn Consumer>,
    task_store: Arc<dyn TaskStore>,
    namespace_service: Arc<dyn NamespaceService>,
    config: SchedulerConfig,
    monitor: Mutex<()>,
    shutdown: AtomicBool,
}

impl Scheduler {
    pub fn new(
        producer: Arc<dyn Producer>,
        consumer: Arc<dyn Consumer>,
        task_store: Arc<dyn TaskStore>,
        namespace_service: Arc<dyn NamespaceService>,
        config: SchedulerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let timeout_mgr = TimeoutManager::new(Arc::new(TimeoutChannelSink { tx }));

        Self {
            inner: Arc::new(SchedulerInner {
                provider: TaskProvider::new(),
                timeout_mgr,
                timeout_rx: Mutex::new(Some(rx)),
                producer,
                consumer,
                task_store,
                namespace_service,
                config,
                monitor: Mutex::new(()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    // -- Submission ----------------------------------------------------

    /// Add a task, resolve its dependencies, transition it to `WAITING` (or
    /// `FAILED` if resolution fails), then dispatch anything newly ready.
    /// Duplicate submissions are a silent no-op.
    pub async fn submit(&self, task: Task) -> Result<()> {
        let _guard = self.inner.monitor.lock().await;
        let id = task.id.clone();

        if !self.inner.provider.add(task) {
            return Ok(());
        }

        if self.inner.provider.resolve(&id) {
            self.inner.provider.set_status(&id, Status::Waiting, None);
            tracing::info!(task_id = %id, "task resolved, now waiting");
        } else {
            self.inner.provider.set_status(
                &id,
                Status::Failed,
                Some(reserved_messages::FAILED_TO_RESOLVE_DEPENDENCY.to_string()),
            );
            tracing::warn!(task_id = %id, "dependency resolution failed");
            self.cascade_failure(&id);
        }

        self.schedule_ready().await;
        Ok(())
    }

    // -- Status updates --------------------------------------------------

    /// Apply a status transition reported by a worker (or by the timeout
    /// subsystem). Idempotent: re-delivering the same terminal status is a
    /// no-op, and updates against an unknown id are logged and ignored.
    pub async fn update_status(
        &self,
        id: &TaskId,
        new_status: Status,
        message: Option<String>,
        context: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<()> {
        let _guard = self.inner.monitor.lock().await;
        self.update_status_locked(id, new_status, message, context).await
    }

    async fn update_status_locked(
        &self,
        id: &TaskId,
        new_status: Status,
        message: Option<String>,
        context: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<()> {
        let Some(current) = self.inner.provider.get_task(id) else {
            tracing::error!(task_id = %id, "status update for unknown task, ignored");
            return Ok(());
        };

        if current.status.is_terminal() || current.status == new_status {
            return Ok(());
        }

        if let Some(ctx) = context {
            self.inner.provider.set_context(id, ctx);
        }

        match new_status {
            Status::Submitted => {
                let now = Utc::now();
                self.inner.provider.set_submitted_at(id, now);
                self.inner.provider.set_status(id, Status::Submitted, None);
                let deadline = now + chrono::Duration::milliseconds(current.max_execution_time_ms);
                self.inner.timeout_mgr.arm(id.clone(), deadline);
            }
            Status::Running => {
                self.inner.provider.set_status(id, Status::Running, None);
            }
            Status::Successful => {
                self.inner.timeout_mgr.cancel(id);
                self.inner.provider.set_status(id, Status::Successful, message.clone());
                self.persist(id, Status::Successful, message).await;
                self.schedule_ready().await;
            }
            Status::Failed => {
                self.inner.timeout_mgr.cancel(id);
                self.inner.provider.set_status(id, Status::Failed, message.clone());
                self.persist(id, Status::Failed, message).await;
                self.cascade_failure(id);
            }
            Status::Created | Status::Waiting | Status::Scheduled => {
                return Err(OrchestratorError::InvalidTransition {
                    task_id: id.clone(),
                    from: current.status,
                    to: new_status,
                });
            }
        }

        Ok(())
    }

    /// Best-effort mirror of a terminal status change into the task store.
    /// Failure is logged, never propagated: in-memory state has already
    /// advanced, and a restart reloads from the store.
    async fn persist(&self, id: &TaskId, status: Status, message: Option<String>) {
        let Some(task) = self.inner.provider.get_task(id) else {
            return;
        };
        let context = if task.context.is_empty() {
            None
        } else {
            Some(task.context.clone())
        };
        if let Err(err) = self
            .inner
            .task_store
            .update_status(&task, status, message, context, task.completed_at)
            .await
        {
            tracing::error!(task_id = %id, error = %err, "task store write failed");
        }
    }

    // -- Dispatch --------------------------------------------------------

    /// Dispatch every currently-ready task: interpolate properties, send on
    /// the outbound queue, transition to `SCHEDULED` or fail it. Dispatched
    /// in `createdAt` ascending / id-tuple-tiebreak order.
    async fn schedule_ready(&self) {
        for mut task in self.inner.provider.get_ready_tasks() {
            let upstream_ids = self.inner.provider.upstream_ids(&task.id);
            let upstreams: Vec<Task> = upstream_ids
                .iter()
                .filter_map(|u| self.inner.provider.get_task(u))
                .collect();

            ContextInterpolator::interpolate(&mut task, &upstreams);
            self.inner.provider.set_properties(&task.id, task.properties.clone());

            let payload = match serde_json::to_vec(&task) {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.fail_submission(&task.id, err.to_string()).await;
                    continue;
                }
            };

            match self.inner.producer.send(&task.task_type, payload) {
                Ok(()) => {
                    self.inner.provider.set_status(&task.id, Status::Scheduled, None);
                    tracing::info!(task_id = %task.id, queue = %task.task_type, "task scheduled");
                }
                Err(err) => {
                    self.fail_submission(&task.id, err.to_string()).await;
                }
            }
        }
    }

    async fn fail_submission(&self, id: &TaskId, reason: String) {
        tracing::error!(task_id = %id, reason = %reason, "task submission failed");
        self.inner.provider.set_status(
            id,
            Status::Failed,
            Some(reserved_messages::TASK_SUBMISSION_FAILED.to_string()),
        );
        self.persist(id, Status::Failed, Some(reserved_messages::TASK_SUBMISSION_FAILED.to_string()))
            .await;
        self.cascade_failure(id);
    }

    /// Move every non-terminal transitive dependent of `id` to
    /// `FAILED`/`FAILED_TO_RESOLVE_DEPENDENCY`. Terminal tasks are left
    /// untouched -- terminal states are absorbing.
    fn cascade_failure(&self, id: &TaskId) {
        let mut queue: Vec<TaskId> = self
            .inner
            .provider
            .get_dependent_tasks(id)
            .into_iter()
            .map(|t| t.id)
            .collect();

        while let Some(dep_id) = queue.pop() {
            let Some(dep) = self.inner.provider.get_task(&dep_id) else {
                continue;
            };
            if dep.status.is_terminal() {
                continue;
            }
            self.inner.timeout_mgr.cancel(&dep_id);
            self.inner.provider.set_status(
                &dep_id,
                Status::Failed,
                Some(reserved_messages::FAILED_TO_RESOLVE_DEPENDENCY.to_string()),
            );
            tracing::warn!(task_id = %dep_id, cause = %id, "cascaded failure");
            queue.extend(self.inner.provider.get_dependent_tasks(&dep_id).into_iter().map(|t| t.id));
        }
    }

    // -- Cleanup -----------------------------------------------------------

    pub fn delete_stale_tasks(&self) -> usize {
        let min_age_ms = self.inner.config.purge_interval.as_millis() as i64;
        self.inner.provider.remove_stale_tasks(min_age_ms)
    }

    // -- Introspection -----------------------------------------------------

    pub fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.inner.provider.get_task(id)
    }

    pub fn size(&self) -> usize {
        self.inner.provider.size()
    }

    pub fn get_active_tasks(&self) -> Vec<Task> {
        self.inner.provider.get_active_tasks()
    }

    // -- Startup / recovery --------------------------------------------

    /// Load every task from the store across all known namespaces, sorted
    /// by `createdAt` ascending, re-resolve the non-terminal ones, and
    /// re-arm timeout timers for already-`SUBMITTED`/`RUNNING` tasks (an
    /// already-elapsed deadline fires immediately once [`Scheduler::start`]
    /// spawns the timeout consumer). Terminal tasks are loaded too, purely
    /// so they remain available as resolver candidates for any non-terminal
    /// task that still depends on them; they are not re-transitioned.
    pub async fn recover(&self) -> Result<()> {
        let _guard = self.inner.monitor.lock().await;

        let namespaces = self.inner.namespace_service.list().await?;
        let all_statuses = [
            Status::Created,
            Status::Waiting,
            Status::Scheduled,
            Status::Submitted,
            Status::Running,
            Status::Successful,
            Status::Failed,
        ];

        let mut tasks = Vec::new();
        for ns in namespaces {
            tasks.extend(self.inner.task_store.get_by_status(&ns, &all_statuses).await?);
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        for task in tasks {
            let id = task.id.clone();
            let status = task.status;
            let submitted_at = task.submitted_at;
            let max_execution_time_ms = task.max_execution_time_ms;

            self.inner.provider.add(task);

            if status == Status::Created || status == Status::Waiting {
                if self.inner.provider.resolve(&id) {
                    self.inner.provider.set_status(&id, Status::Waiting, None);
                } else {
                    self.inner.provider.set_status(
                        &id,
                        Status::Failed,
                        Some(reserved_messages::FAILED_TO_RESOLVE_DEPENDENCY.to_string()),
                    );
                    self.cascade_failure(&id);
                }
            }

            if status.needs_timeout_timer() {
                if let Some(submitted_at) = submitted_at {
                    let deadline = submitted_at + chrono::Duration::milliseconds(max_execution_time_ms);
                    self.inner.timeout_mgr.arm(id, deadline);
                }
            }
        }

        self.schedule_ready().await;
        Ok(())
    }

    // -- Background loops --------------------------------------------------

    /// Spawn the status-queue poller, the timeout-firing consumer, and the
    /// periodic purge sweep. Returns their join handles for
    /// [`Scheduler::shutdown`].
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.spawn_status_poller(),
            self.spawn_timeout_consumer(),
            self.spawn_purge_sweep(),
        ]
    }

    fn spawn_status_poller(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        let interval = self.inner.config.poll_interval;
        tokio::spawn(async move {
            tracing::info!("status queue poller started");
            while !scheduler.inner.shutdown.load(Ordering::Acquire) {
                match scheduler.inner.consumer.poll(STATUS_QUEUE).await {
                    Ok(payloads) => {
                        for payload in payloads {
                            scheduler.handle_status_payload(&payload).await;
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "status queue poll failed");
                    }
                }
                tokio::time::sleep(interval).await;
            }
            tracing::info!("status queue poller stopped");
        })
    }

    async fn handle_status_payload(&self, payload: &[u8]) {
        let msg: StatusMessage = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::error!(error = %err, "malformed status message, skipped");
                return;
            }
        };

        let context = if msg.context.is_empty() { None } else { Some(msg.context) };
        let new_status: Status = msg.status.into();

        if let Err(err) = self
            .update_status(&msg.task_id, new_status, msg.status_message, context)
            .await
        {
            tracing::error!(task_id = %msg.task_id, error = %err, "status update rejected");
        }
    }

    fn spawn_timeout_consumer(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut rx = scheduler
                .inner
                .timeout_rx
                .lock()
                .await
                .take()
                .expect("timeout receiver taken twice");
            tracing::info!("timeout consumer started");
            while let Some(task_id) = rx.recv().await {
                let _guard = scheduler.inner.monitor.lock().await;
                let _ = scheduler
                    .update_status_locked(
                        &task_id,
                        Status::Failed,
                        Some(reserved_messages::TIMED_OUT.to_string()),
                        None,
                    )
                    .await;
            }
            tracing::info!("timeout consumer stopped");
        })
    }

    fn spawn_purge_sweep(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        let interval = self.inner.config.purge_interval;
        tokio::spawn(async move {
            tracing::info!("purge sweep started");
            while !scheduler.inner.shutdown.load(Ordering::Acquire) {
                tokio::time::sleep(interval).await;
                if scheduler.inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                let _guard = scheduler.inner.monitor.lock().await;
                let evicted = scheduler.delete_stale_tasks();
                if evicted > 0 {
                    tracing::info!(evicted, "purge sweep evicted stale tasks");
                }
            }
            tracing::info!("purge sweep stopped");
        })
    }

    /// Cancel all timers, stop the background loops, drain with a 10s
    /// grace, then close the outbound producer and inbound consumer.
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>) {
        tracing::info!("scheduler shutdown requested");
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.timeout_mgr.cancel_all();

        for handle in handles {
            if tokio::time::timeout(std::time::Duration::from_secs(10), handle)
                .await
                .is_err()
            {
                tracing::warn!("background task did not stop within grace period");
            }
        }

        self.inner.producer.close();
        self.inner.consumer.close().await;
    }
}

impl Clone for Scheduler {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
