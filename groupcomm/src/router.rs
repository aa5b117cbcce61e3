//! Inbound dispatch: maps each arriving framed message to the operator
//! topology registered under its `(group, operator)` key.

use crate::errors::{GroupCommError, Result};
use crate::message::GroupCommMessage;
use crate::topology::TopologyCore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Routes inbound messages to operator topologies.
///
/// All operators are registered when the owning client is built, so the hot
/// path is a read-only map lookup. `deliver` is synchronous and safe to call
/// from transport threads.
pub struct MessageRouter {
    routes: RwLock<HashMap<(String, String), Arc<TopologyCore>>>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, topology: Arc<TopologyCore>) -> Result<()> {
        let key = (
            topology.group_name().to_string(),
            topology.operator_name().to_string(),
        );
        let mut routes = self.routes.write().expect("router lock poisoned");
        if routes.contains_key(&key) {
            return Err(GroupCommError::InvalidArgument(format!(
                "operator '{}' already registered in group '{}'",
                key.1, key.0
            )));
        }
        routes.insert(key, topology);
        Ok(())
    }

    /// Hand off a decoded framed message to the right operator topology.
    ///
    /// Fails with `UnknownOperator` when no topology is registered under the
    /// message's `(group, operator)` key; topology-level validation errors
    /// (unknown peer, malformed message) propagate unchanged.
    pub fn deliver(&self, message: GroupCommMessage) -> Result<()> {
        trace!(
            message_id = %message.message_id,
            group = %message.group_name,
            operator = %message.operator_name,
            source = %message.source,
            "Routing inbound message"
        );
        let topology = self
            .routes
            .read()
            .expect("router lock poisoned")
            .get(&message.route_key())
            .cloned()
            .ok_or_else(|| GroupCommError::UnknownOperator {
                group: message.group_name.clone(),
                operator: message.operator_name.clone(),
            })?;
        topology.on_message(message)
    }

    /// Number of registered operators across all groups
    pub fn len(&self) -> usize {
        self.routes.read().expect("router lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TaskId;
    use crate::message::MessageKind;

    #[test]
    fn test_unknown_operator() {
        let router = MessageRouter::new();
        let message = GroupCommMessage::new(
            "g",
            "missing",
            TaskId::new("task-1"),
            TaskId::new("task-0"),
            MessageKind::Data,
            vec![vec![1]],
        );
        let err = router.deliver(message).unwrap_err();
        match err {
            GroupCommError::UnknownOperator { group, operator } => {
                assert_eq!(group, "g");
                assert_eq!(operator, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_router() {
        let router = MessageRouter::new();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }
}
