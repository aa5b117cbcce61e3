//! Directory mapping task identifiers to network endpoints.
//!
//! Tasks register themselves at startup so peers can find them; operator
//! initialization polls `lookup` until every peer of the topology appears.

mod http;
mod memory;

pub use http::HttpNameService;
pub use memory::InMemoryNameService;

use crate::errors::Result;
use crate::id::{Endpoint, TaskId};
use async_trait::async_trait;

/// External name directory used by the engine.
///
/// `lookup` is a pure query; transient failures are treated as misses and
/// retried by the caller.
#[async_trait]
pub trait NameService: Send + Sync {
    /// Publish this task's endpoint so peers can resolve it
    async fn register(&self, task_id: TaskId, endpoint: Endpoint) -> Result<()>;

    /// Remove this task's entry on shutdown
    async fn unregister(&self, task_id: &TaskId) -> Result<()>;

    /// Resolve a peer, returning `None` while it has not registered yet
    async fn lookup(&self, task_id: &TaskId) -> Result<Option<Endpoint>>;
}
