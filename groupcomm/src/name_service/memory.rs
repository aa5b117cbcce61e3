use super::NameService;
use crate::errors::Result;
use crate::id::{Endpoint, TaskId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Process-local name service for single-process runtimes and tests.
#[derive(Default)]
pub struct InMemoryNameService {
    entries: RwLock<HashMap<TaskId, Endpoint>>,
}

impl InMemoryNameService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered tasks
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl NameService for InMemoryNameService {
    async fn register(&self, task_id: TaskId, endpoint: Endpoint) -> Result<()> {
        debug!(task_id = %task_id, endpoint = %endpoint, "Registering task");
        self.entries.write().await.insert(task_id, endpoint);
        Ok(())
    }

    async fn unregister(&self, task_id: &TaskId) -> Result<()> {
        debug!(task_id = %task_id, "Unregistering task");
        self.entries.write().await.remove(task_id);
        Ok(())
    }

    async fn lookup(&self, task_id: &TaskId) -> Result<Option<Endpoint>> {
        Ok(self.entries.read().await.get(task_id).cloned())
    }
}
