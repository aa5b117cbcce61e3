//! Outbound path: the transport seam and the thread-safe sender that
//! collective primitives share, plus an in-process transport for
//! single-process runtimes and tests.

use crate::errors::{GroupCommError, Result};
use crate::id::TaskId;
use crate::message::GroupCommMessage;
use crate::router::MessageRouter;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Wire transport used to deliver framed messages to peer tasks.
///
/// `send` is fire-and-forget: it returns once the transport accepted the
/// message, not once the peer received it. Implementations must be safe for
/// concurrent sends from different collective primitives.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: GroupCommMessage) -> Result<()>;

    /// Release any resources held for this task. Called once on client
    /// shutdown; the default does nothing.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Synchronous fire-and-forget outbound path shared by all topologies of a
/// task.
#[derive(Clone)]
pub struct Sender {
    transport: Arc<dyn Transport>,
}

impl Sender {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Hand a framed message to the transport, addressed to its destination
    pub async fn send(&self, message: GroupCommMessage) -> Result<()> {
        debug!(
            message_id = %message.message_id,
            group = %message.group_name,
            operator = %message.operator_name,
            destination = %message.destination,
            payloads = message.payloads.len(),
            "Sending message"
        );
        self.transport.send(message).await
    }
}

/// Transport that routes messages between tasks of the same process.
///
/// Each task attaches its message router under its task id; `send` looks up
/// the destination and dispatches synchronously. Delivery errors raised by
/// the receiving topology propagate to the sender.
#[derive(Clone, Default)]
pub struct InProcessTransport {
    routes: Arc<RwLock<HashMap<TaskId, Arc<MessageRouter>>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a task reachable under `task_id`
    pub fn attach(&self, task_id: TaskId, router: Arc<MessageRouter>) {
        self.routes
            .write()
            .expect("transport route table lock poisoned")
            .insert(task_id, router);
    }

    /// Remove a task from the route table
    pub fn detach(&self, task_id: &TaskId) {
        self.routes
            .write()
            .expect("transport route table lock poisoned")
            .remove(task_id);
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&self, message: GroupCommMessage) -> Result<()> {
        let router = self
            .routes
            .read()
            .expect("transport route table lock poisoned")
            .get(&message.destination)
            .cloned()
            .ok_or_else(|| {
                GroupCommError::Transport(format!("no route to task {}", message.destination))
            })?;
        router.deliver(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn message_to(destination: &str) -> GroupCommMessage {
        GroupCommMessage::new(
            "g",
            "op",
            TaskId::new("task-0"),
            TaskId::new(destination),
            MessageKind::Data,
            vec![vec![1]],
        )
    }

    #[tokio::test]
    async fn test_unknown_destination_is_transport_error() {
        let transport = InProcessTransport::new();
        let err = transport.send(message_to("task-9")).await.unwrap_err();
        assert!(matches!(err, GroupCommError::Transport(_)));
    }

    #[tokio::test]
    async fn test_detached_task_unreachable() {
        let transport = InProcessTransport::new();
        let router = Arc::new(MessageRouter::new());
        transport.attach(TaskId::new("task-1"), router);
        transport.detach(&TaskId::new("task-1"));
        let err = transport.send(message_to("task-1")).await.unwrap_err();
        assert!(matches!(err, GroupCommError::Transport(_)));
    }

    #[tokio::test]
    async fn test_attached_router_receives_unknown_operator() {
        // An attached but empty router rejects with the router's own error,
        // proving dispatch reached the destination task.
        let transport = InProcessTransport::new();
        transport.attach(TaskId::new("task-1"), Arc::new(MessageRouter::new()));
        let err = transport.send(message_to("task-1")).await.unwrap_err();
        assert!(matches!(err, GroupCommError::UnknownOperator { .. }));
    }
}
