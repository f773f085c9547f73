//! Injected collaborators.
//!
//! Persistent storage, the outbound/inbound queue transports, and namespace
//! enumeration are external to the scheduling core — it only needs the
//! interface. Implementations (SQLite-backed stores, Kafka/SQS queues, a
//! REST-backed namespace directory) live outside this crate; tests use the
//! in-memory fakes in `tests/`.

use crate::error::Result;
use crate::task::{Status, Task};

/// Outbound side of a task queue: `send(type, payload)`.
///
/// `send` must be non-blocking from the scheduler's perspective — either it
/// truly does not block, or the implementation applies its own async
/// buffering. The scheduler holds its monitor while calling this.
pub trait Producer: Send + Sync {
    fn send(&self, queue: &str, payload: Vec<u8>) -> Result<()>;
    fn close(&self);
}

/// Inbound side of the status queue: `poll(queue) -> [bytes]`.
#[async_trait::async_trait]
pub trait Consumer: Send + Sync {
    async fn poll(&self, queue: &str) -> Result<Vec<Vec<u8>>>;
    async fn close(&self);
}

/// Persistent task storage, used only at startup for rehydration and as a
/// best-effort mirror of status changes.
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_by_status(&self, namespace: &str, statuses: &[Status]) -> Result<Vec<Task>>;

    async fn update_status(
        &self,
        task: &Task,
        status: Status,
        message: Option<String>,
        context: Option<serde_json::Map<String, serde_json::Value>>,
        completed_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()>;
}

/// Enumerates the namespaces the scheduler should rehydrate on startup.
#[async_trait::async_trait]
pub trait NamespaceService: Send + Sync {
    async fn list(&self) -> Result<Vec<String>>;
}
