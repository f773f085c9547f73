//! In-memory indexed task graph.
//!
//! `TaskProvider` is the sole owner of every live [`Task`] record. All other
//! components hold references only while the scheduler's monitor is held.
//! Five indexes are maintained eagerly rather than recomputed on read, one
//! `DashMap` per concern:
//!
//! - `tasks`: primary `id -> Task`.
//! - `by_name`: `(namespace, name) -> Vec<TaskId>`, ordered by `createdAt`,
//!   for resolver lookups.
//! - `dependents`: reverse edges, `TaskId -> set of dependent TaskId`, for
//!   O(degree) failure cascades.
//! - `upstreams`: forward edges, `TaskId -> set of upstream TaskId`, the
//!   mirror of `dependents`, for O(degree) readiness checks.
//! - `by_status`: `Status -> set of TaskId`, for `getReadyTasks` /
//!   `getActiveTasks` / restart rehydration.

use std::collections::HashSet;

use chrono::Utc;
use dashmap::DashMap;

use crate::resolver::Resolver;
use crate::task::{Status, Task, TaskId};

/// Concurrent, indexed task graph. Cheaply cloneable (`Arc`-backed fields
/// would be redundant here since every field is already a `DashMap`, itself
/// internally `Arc`-shared once wrapped by the caller in an `Arc`).
pub struct TaskProvider {
    tasks: DashMap<TaskId, Task>,
    by_name: DashMap<(String, String), Vec<TaskId>>,
    dependents: DashMap<TaskId, HashSet<TaskId>>,
    upstreams: DashMap<TaskId, HashSet<TaskId>>,
    by_status: DashMap<Status, HashSet<TaskId>>,
}

impl TaskProvider {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            by_name: DashMap::new(),
            dependents: DashMap::new(),
            upstreams: DashMap::new(),
            by_status: DashMap::new(),
        }
    }

    /// Insert `task` if its id is absent. Returns `true` on insert, `false`
    /// on duplicate (per-invariant: duplicate `add` is a silent no-op).
    pub fn add(&self, task: Task) -> bool {
        if self.tasks.contains_key(&task.id) {
            tracing::debug!(task_id = %task.id, "duplicate add, ignored");
            return false;
        }

        let id = task.id.clone();
        let status = task.status;

        self.by_name
            .entry((id.namespace.clone(), id.name.clone()))
            .or_default()
            .push(id.clone());

        self.index_status(&id, None, status);
        self.tasks.insert(id.clone(), task);
        self.dependents.entry(id.clone()).or_default();
        self.upstreams.entry(id.clone()).or_default();

        tracing::debug!(task_id = %id, ?status, "task added");
        true
    }

    /// Run the resolver against a freshly added task. On success, wires both
    /// the forward (`upstreams`) and reverse (`dependents`) edges and
    /// returns `true`. On failure the task is left without edges.
    pub fn resolve(&self, task_id: &TaskId) -> bool {
        let Some(task) = self.get_task(task_id) else {
            return false;
        };

        match Resolver::resolve(self, &task) {
            Ok(upstreams) => {
                self.upstreams
                    .entry(task_id.clone())
                    .or_default()
                    .extend(upstreams.iter().cloned());
                for upstream in upstreams {
                    self.dependents.entry(upstream).or_default().insert(task_id.clone());
                }
                true
            }
            Err(_) => false,
        }
    }

    pub fn get_task(&self, id: &TaskId) -> Option<Task> {
        self.tasks.get(id).map(|e| e.value().clone())
    }

    /// All candidate upstream instances sharing `namespace` and `name`,
    /// ordered by `createdAt` ascending (resolver lookup).
    pub fn candidates(&self, namespace: &str, name: &str) -> Vec<Task> {
        let ids = self
            .by_name
            .get(&(namespace.to_string(), name.to_string()))
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut tasks: Vec<Task> = ids.iter().filter_map(|id| self.get_task(id)).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    pub fn get_tasks(&self, statuses: &[Status]) -> Vec<Task> {
        statuses
            .iter()
            .flat_map(|s| {
                self.by_status
                    .get(s)
                    .map(|e| e.value().clone())
                    .unwrap_or_default()
            })
            .filter_map(|id| self.get_task(&id))
            .collect()
    }

    pub fn get_active_tasks(&self) -> Vec<Task> {
        self.get_tasks(&[
            Status::Created,
            Status::Waiting,
            Status::Scheduled,
            Status::Submitted,
            Status::Running,
        ])
    }

    /// All `WAITING` tasks whose every upstream is `SUCCESSFUL`, ordered by
    /// `createdAt` ascending with id-tuple tie-break (dispatch order).
    pub fn get_ready_tasks(&self) -> Vec<Task> {
        let mut ready: Vec<Task> = self
            .get_tasks(&[Status::Waiting])
            .into_iter()
            .filter(|t| self.is_ready_for_execution(t))
            .collect();
        ready.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        ready
    }

    /// Direct dependents via the reverse-edge index.
    pub fn get_dependent_tasks(&self, id: &TaskId) -> Vec<Task> {
        self.dependents
            .get(id)
            .map(|e| e.value().iter().filter_map(|d| self.get_task(d)).collect())
            .unwrap_or_default()
    }

    pub fn is_ready_for_execution(&self, task: &Task) -> bool {
        if task.status != Status::Waiting {
            return false;
        }
        self.upstream_ids(&task.id)
            .iter()
            .all(|u| self.get_task(u).map(|t| t.status == Status::Successful).unwrap_or(false))
    }

    /// Upstream ids wired onto `id` by a prior successful `resolve`.
    pub fn upstream_ids(&self, id: &TaskId) -> Vec<TaskId> {
        self.upstreams
            .get(id)
            .map(|e| e.value().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of live tasks.
    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    /// Apply a status transition and, if the status changed, move the task
    /// between `by_status` buckets.
    pub fn set_status(&self, id: &TaskId, status: Status, status_message: Option<String>) {
        let old_status = {
            let Some(mut entry) = self.tasks.get_mut(id) else {
                return;
            };
            let old = entry.status;
            entry.status = status;
            if status_message.is_some() {
                entry.status_message = status_message;
            }
            if status.is_terminal() {
                entry.completed_at = Some(Utc::now());
            }
            old
        };
        self.index_status(id, Some(old_status), status);
    }

    pub fn set_submitted_at(&self, id: &TaskId, when: chrono::DateTime<Utc>) {
        if let Some(mut entry) = self.tasks.get_mut(id) {
            entry.submitted_at = Some(when);
        }
    }

    pub fn set_properties(&self, id: &TaskId, properties: serde_json::Map<String, serde_json::Value>) {
        if let Some(mut entry) = self.tasks.get_mut(id) {
            entry.properties = properties;
        }
    }

    pub fn set_context(&self, id: &TaskId, context: serde_json::Map<String, serde_json::Value>) {
        if let Some(mut entry) = self.tasks.get_mut(id) {
            entry.context = context;
        }
    }

    fn index_status(&self, id: &TaskId, old: Option<Status>, new: Status) {
        if let Some(old) = old {
            if old == new {
                return;
            }
            if let Some(mut bucket) = self.by_status.get_mut(&old) {
                bucket.remove(id);
            }
        }
        self.by_status.entry(new).or_default().insert(id.clone());
    }

    /// Evict a job iff every sibling sharing `(namespace, workflow, job)` is
    /// terminal and at least one sibling has aged past `min_age_ms` since its
    /// `completedAt`. Siblings are evicted together, atomically, never
    /// piecemeal -- a single aged-out sibling takes the whole job with it.
    pub fn remove_stale_tasks(&self, min_age_ms: i64) -> usize {
        let now = Utc::now();
        let mut jobs: std::collections::HashMap<(String, String, String), Vec<Task>> =
            std::collections::HashMap::new();

        for entry in self.tasks.iter() {
            let t = entry.value();
            let key = (t.id.namespace.clone(), t.id.workflow.clone(), t.id.job.clone());
            jobs.entry(key).or_default().push(t.clone());
        }

        let mut evicted = 0usize;
        for (_, siblings) in jobs {
            let all_terminal = siblings.iter().all(|t| t.status.is_terminal());
            if !all_terminal {
                continue;
            }
            let any_aged = siblings.iter().any(|t| {
                t.completed_at
                    .map(|c| (now - c).num_milliseconds() >= min_age_ms)
                    .unwrap_or(false)
            });
            if !any_aged {
                continue;
            }

            for t in &siblings {
                self.tasks.remove(&t.id);
                self.dependents.remove(&t.id);
                self.upstreams.remove(&t.id);
                if let Some(mut bucket) = self.by_status.get_mut(&t.status) {
                    bucket.remove(&t.id);
                }
                if let Some(mut names) = self.by_name.get_mut(&(t.id.namespace.clone(), t.id.name.clone())) {
                    names.retain(|i| i != &t.id);
                }
                evicted += 1;
            }
            tracing::info!(job = %siblings[0].id.job, count = siblings.len(), "job evicted");
        }
        evicted
    }
}

impl Default for TaskProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{DependencyMode, DependsOn, Task};

    fn task(namespace: &str, job: &str, name: &str, status: Status) -> Task {
        let mut t = Task::new(
            TaskId::new(namespace, "wf", job, name),
            "test",
            1000,
            vec![],
            serde_json::Map::new(),
            Utc::now(),
        );
        t.status = status;
        t
    }

    #[test]
    fn duplicate_add_is_noop() {
        let p = TaskProvider::new();
        let t = task("ns", "job1", "a", Status::Created);
        assert!(p.add(t.clone()));
        assert!(!p.add(t));
        assert_eq!(p.size(), 1);
    }

    #[test]
    fn ready_tasks_require_all_upstreams_successful() {
        let p = TaskProvider::new();
        let mut a = task("ns", "job1", "a", Status::Successful);
        a.completed_at = Some(Utc::now());
        p.add(a.clone());

        let mut b = Task::new(
            TaskId::new("ns", "wf", "job1", "b"),
            "test",
            1000,
            vec![DependsOn {
                name: "a".into(),
                mode: DependencyMode::All,
                lookback: chrono::Duration::days(1),
            }],
            serde_json::Map::new(),
            Utc::now(),
        );
        b.status = Status::Waiting;
        p.add(b.clone());
        p.resolve(&b.id);

        let ready = p.get_ready_tasks();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, b.id);
    }

    #[test]
    fn remove_stale_tasks_evicts_whole_job_atomically() {
        let p = TaskProvider::new();
        let old = Utc::now() - chrono::Duration::hours(2);

        for name in ["a", "b", "c"] {
            let mut t = task("ns", "job1", name, Status::Successful);
            t.created_at = old;
            t.completed_at = Some(old);
            p.add(t);
        }
        // one sibling still active
        let mut d = task("ns", "job1", "d", Status::Running);
        d.created_at = old;
        p.add(d.clone());

        assert_eq!(p.remove_stale_tasks(3_600_000), 0);
        assert_eq!(p.size(), 4);

        p.set_status(&d.id, Status::Successful, None);
        // d's own completed_at is "now" (not yet aged), but a/b/c completed
        // 2h ago -- one aged sibling is enough to evict the whole job.
        assert_eq!(p.remove_stale_tasks(3_600_000), 4);
        assert_eq!(p.size(), 0);
    }
}
