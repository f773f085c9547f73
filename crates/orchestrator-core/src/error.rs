//! Scheduling-core error types.
//!
//! Every public API in this crate surfaces errors through
//! [`OrchestratorError`], the single error type returned across the whole
//! crate. Variants are grouped by the subsystem that raises them. A
//! duplicate submission is a silent no-op and never reaches this type; an
//! unresolvable dependency, a timed-out task, or a rejected outbound send
//! all do, so the scheduler can decide how to transition the task.

use crate::task::{Status, TaskId};

/// Unified error type for the scheduling core.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    // -- Resolver errors ------------------------------------------------
    /// No upstream instance satisfied a `dependsOn` entry within its
    /// look-back window.
    #[error("unresolvable dependency `{dependency}` for task {task_id}")]
    UnresolvableDependency {
        task_id: TaskId,
        dependency: String,
    },

    // -- Scheduler errors -------------------------------------------------
    /// The task id does not exist in the provider.
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: TaskId },

    /// Publishing the serialized task onto the outbound queue failed.
    #[error("submission to queue failed for task {task_id}: {reason}")]
    SubmissionFailed { task_id: TaskId, reason: String },

    /// A status update named a status that is not a legal successor of the
    /// task's current status.
    #[error("invalid transition for {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: TaskId,
        from: Status,
        to: Status,
    },

    // -- Timeout errors ---------------------------------------------------
    /// A task's execution deadline elapsed before it reached a terminal
    /// status.
    #[error("task {task_id} timed out")]
    TimedOut { task_id: TaskId },

    // -- Store / transport errors -----------------------------------------
    /// The injected [`crate::traits::TaskStore`] failed to persist a status
    /// change. In-memory state still advances; this is logged, not
    /// propagated to the caller of `update_status`.
    #[error("task store write failed for {task_id}: {reason}")]
    StoreWriteFailed { task_id: TaskId, reason: String },

    /// The injected [`crate::traits::Consumer`] returned a payload that is
    /// not a well-formed status message.
    #[error("malformed status message: {reason}")]
    MalformedStatusMessage { reason: String },

    // -- Generic ------------------------------------------------------------
    /// Catch-all for conditions that do not fit a more specific variant.
    /// Prefer a typed variant whenever possible.
    #[error("internal scheduling error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Reserved, bit-exact `statusMessage` strings (see the wire format notes).
pub mod reserved_messages {
    pub const TIMED_OUT: &str = "TIMED_OUT";
    pub const FAILED_TO_RESOLVE_DEPENDENCY: &str = "FAILED_TO_RESOLVE_DEPENDENCY";
    pub const TASK_SUBMISSION_FAILED: &str = "TASK_SUBMISSION_FAILED";
}
