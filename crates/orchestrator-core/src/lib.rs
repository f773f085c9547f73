//! Scheduling core for a distributed task orchestrator.
//!
//! This crate provides the in-memory dependency graph, state machine, and
//! timeout/context-propagation machinery that a scheduler node runs against
//! an externally-supplied queue transport and task store:
//!
//! - **[`task`]** -- the [`task::Task`] data model: composite
//!   `(namespace, workflow, job, name)` identity, the `CREATED -> ... ->
//!   {SUCCESSFUL, FAILED}` [`task::Status`] lifecycle, and the inbound wire
//!   format.
//! - **[`provider`]** -- [`provider::TaskProvider`], the `DashMap`-indexed
//!   concurrent task graph (primary, by-name, forward-edge, reverse-edge,
//!   and by-status indexes).
//! - **[`resolver`]** -- [`resolver::Resolver`], matching `dependsOn`
//!   entries against candidate upstream instances within a look-back
//!   window.
//! - **[`interpolate`]** -- [`interpolate::ContextInterpolator`],
//!   `${producer.key}` / `${*.key}` property substitution.
//! - **[`timeout`]** -- [`timeout::TimeoutManager`], one cancellable
//!   deferred timer per active task.
//! - **[`scheduler`]** -- [`scheduler::Scheduler`], the component tying the
//!   above together behind a coarse monitor lock.
//! - **[`traits`]** -- the collaborator seams (`Producer`, `Consumer`,
//!   `TaskStore`, `NamespaceService`) implemented outside this crate.
//! - **[`error`]** -- unified error type via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod config;
pub mod error;
pub mod interpolate;
pub mod provider;
pub mod resolver;
pub mod scheduler;
pub mod task;
pub mod timeout;
pub mod traits;

pub use config::SchedulerConfig;
pub use error::{reserved_messages, OrchestratorError, Result};
pub use interpolate::ContextInterpolator;
pub use provider::TaskProvider;
pub use resolver::Resolver;
pub use scheduler::Scheduler;
pub use task::{DependencyMode, DependsOn, InboundStatus, Status, StatusMessage, Task, TaskId};
pub use timeout::{TimeoutManager, TimeoutSink};
pub use traits::{Consumer, NamespaceService, Producer, TaskStore};
