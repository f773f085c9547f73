//! Task data model.
//!
//! A [`Task`] is the unit the scheduling core operates on. Identity is the
//! `(namespace, workflow, job, name)` tuple — never a synthetic id — so that
//! two submissions describing the same logical task collide and the
//! duplicate-is-a-no-op invariant holds without a side index.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Globally unique task identity.
///
/// Ordered lexicographically by `(namespace, workflow, job, name)`, which is
/// the tie-break the resolver and the ready-dispatch order both rely on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub namespace: String,
    pub workflow: String,
    pub job: String,
    pub name: String,
}

impl TaskId {
    pub fn new(
        namespace: impl Into<String>,
        workflow: impl Into<String>,
        job: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            workflow: workflow.into(),
            job: job.into(),
            name: name.into(),
        }
    }

    /// The `(namespace, workflow, job)` scope a dependency name is resolved
    /// within.
    pub fn job_scope(&self) -> (&str, &str, &str) {
        (&self.namespace, &self.workflow, &self.job)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.namespace, self.workflow, self.job, self.name
        )
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Created,
    Waiting,
    Scheduled,
    Submitted,
    Running,
    Successful,
    Failed,
}

impl Status {
    /// `SUCCESSFUL` and `FAILED` are terminal and absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Successful | Status::Failed)
    }

    /// A timer exists for a task iff it is `SUBMITTED` or `RUNNING`.
    pub fn needs_timeout_timer(self) -> bool {
        matches!(self, Status::Submitted | Status::Running)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Selection strategy over candidate upstream instances within a look-back
/// window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyMode {
    /// Every upstream instance in the window becomes a dependency edge.
    All,
    /// The earliest-by-`createdAt` upstream instance in the window.
    First,
    /// The latest-by-`createdAt` upstream instance in the window.
    Last,
}

/// One entry of a task's `dependsOn` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependsOn {
    /// Upstream task name, resolved within the same
    /// `(namespace, workflow, job)` scope.
    pub name: String,
    pub mode: DependencyMode,
    /// How far back from this task's `createdAt` to look for candidates.
    #[serde(with = "duration_millis")]
    pub lookback: chrono::Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &chrono::Duration, s: S) -> Result<S::Ok, S::Error> {
        d.num_milliseconds().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<chrono::Duration, D::Error> {
        let millis = i64::deserialize(d)?;
        Ok(chrono::Duration::milliseconds(millis))
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A named unit of work with declared dependencies, a type tag routing it to
/// a handler, a maximum execution time, and free-form properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(flatten)]
    pub id: TaskId,

    /// Routes the task to a worker-side handler; also the outbound queue
    /// name.
    #[serde(rename = "type")]
    pub task_type: String,

    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub max_execution_time_ms: i64,

    pub depends_on: Vec<DependsOn>,

    /// Scalar values or `"${producer.key}"` / `"${*.key}"` placeholder
    /// strings, rewritten in place by the [`crate::interpolate`] engine.
    pub properties: serde_json::Map<String, Value>,

    /// Populated by the handler on successful completion; consumed by
    /// downstream tasks during interpolation.
    #[serde(default)]
    pub context: serde_json::Map<String, Value>,

    pub status: Status,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl Task {
    /// Build a freshly-submitted task in `CREATED` status.
    pub fn new(
        id: TaskId,
        task_type: impl Into<String>,
        max_execution_time_ms: i64,
        depends_on: Vec<DependsOn>,
        properties: serde_json::Map<String, Value>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type: task_type.into(),
            created_at,
            submitted_at: None,
            completed_at: None,
            max_execution_time_ms,
            depends_on,
            properties,
            context: serde_json::Map::new(),
            status: Status::Created,
            status_message: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Status message wire format (inbound, from the status queue)
// ---------------------------------------------------------------------------

/// JSON wire format of a message on the inbound status queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub task_id: TaskId,
    pub status: InboundStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub context: serde_json::Map<String, Value>,
}

/// Statuses a worker is allowed to report over the wire. `CREATED` and
/// `WAITING` are core-internal and never arrive externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InboundStatus {
    Submitted,
    Running,
    Successful,
    Failed,
}

impl From<InboundStatus> for Status {
    fn from(value: InboundStatus) -> Self {
        match value {
            InboundStatus::Submitted => Status::Submitted,
            InboundStatus::Running => Status::Running,
            InboundStatus::Successful => Status::Successful,
            InboundStatus::Failed => Status::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_orders_lexicographically() {
        let a = TaskId::new("ns", "wf", "job", "a");
        let b = TaskId::new("ns", "wf", "job", "b");
        assert!(a < b);
    }

    #[test]
    fn status_terminality() {
        assert!(Status::Successful.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(!Status::Waiting.is_terminal());
    }

    #[test]
    fn status_message_roundtrip() {
        let raw = serde_json::json!({
            "taskId": {"namespace": "ns", "workflow": "wf", "job": "job1", "name": "a"},
            "status": "SUCCESSFUL",
            "context": {"out": 42}
        });
        let msg: StatusMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.status, InboundStatus::Successful);
        assert_eq!(msg.context.get("out").unwrap(), 42);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = serde_json::json!({
            "taskId": {"namespace": "ns", "workflow": "wf", "job": "job1", "name": "a"},
            "status": "RUNNING",
            "unexpectedField": "ignored"
        });
        let msg: StatusMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.status, InboundStatus::Running);
    }
}
