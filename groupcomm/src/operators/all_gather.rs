use crate::errors::{GroupCommError, Result};
use crate::id::TaskId;
use crate::message::MessageKind;
use crate::topology::OperatorTopology;
use std::collections::HashMap;

/// All-gather operator: every task contributes one element and receives the
/// full element list.
///
/// Elements are assembled depth-first: a node's own element comes first,
/// followed by each direct child's subtree in declared order. The root's
/// assembled list is broadcast back down the tree, so every task observes
/// the same ordering.
#[derive(Clone)]
pub struct AllGather<T> {
    topology: OperatorTopology<T>,
}

impl<T: Send + Sync + 'static> AllGather<T> {
    pub(crate) fn new(topology: OperatorTopology<T>) -> Self {
        Self { topology }
    }

    /// Contribute `element` and return all elements in default order
    pub async fn apply(&self, element: T) -> Result<Vec<T>> {
        self.apply_inner(element, None).await
    }

    /// Contribute `element`, placing this node's direct children in the
    /// given order instead of the declared one. `order` must name each child
    /// exactly once.
    pub async fn apply_in_order(&self, element: T, order: &[TaskId]) -> Result<Vec<T>> {
        self.apply_inner(element, Some(order)).await
    }

    async fn apply_inner(&self, element: T, order: Option<&[TaskId]>) -> Result<Vec<T>> {
        let topology = &self.topology;

        let mut elements = vec![element];
        if topology.has_children() {
            let mut by_peer: HashMap<TaskId, Vec<T>> = topology
                .gather_from_children()
                .await?
                .into_iter()
                .collect();
            for id in self.child_order(order)? {
                let subtree = by_peer.remove(&id).ok_or_else(|| {
                    GroupCommError::Protocol(format!("missing gathered elements for child {}", id))
                })?;
                elements.extend(subtree);
            }
        }

        if topology.has_parent() {
            topology
                .send_list_to_parent(&elements, MessageKind::Data)
                .await?;
            let full = topology.receive_list_from_parent().await?;
            if topology.has_children() {
                topology
                    .send_list_to_children(&full, MessageKind::Data)
                    .await?;
            }
            Ok(full)
        } else {
            if topology.has_children() {
                topology
                    .send_list_to_children(&elements, MessageKind::Data)
                    .await?;
            }
            Ok(elements)
        }
    }

    fn child_order(&self, order: Option<&[TaskId]>) -> Result<Vec<TaskId>> {
        let declared = self.topology.child_ids();
        let Some(order) = order else {
            return Ok(declared);
        };
        if order.len() != declared.len() {
            return Err(GroupCommError::InvalidArgument(format!(
                "order lists {} peers but the topology has {} children",
                order.len(),
                declared.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for id in order {
            if !declared.contains(id) {
                return Err(GroupCommError::UnknownPeer(id.clone()));
            }
            if !seen.insert(id) {
                return Err(GroupCommError::InvalidArgument(format!(
                    "order lists peer {} more than once",
                    id
                )));
            }
        }
        Ok(order.to_vec())
    }
}
