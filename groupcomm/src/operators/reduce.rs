use crate::codec::ReduceFunction;
use crate::errors::Result;
use crate::message::MessageKind;
use crate::topology::OperatorTopology;
use std::sync::Arc;

/// Contributing half of a reduce operator.
///
/// Leaves send their element straight up; interior nodes first fold the
/// elements arriving from their subtree into their own contribution, so each
/// element of the group is combined exactly once on its way to the root.
pub struct ReduceSender<T> {
    topology: OperatorTopology<T>,
    reduce: Arc<dyn ReduceFunction<T>>,
}

impl<T> Clone for ReduceSender<T> {
    fn clone(&self) -> Self {
        Self {
            topology: self.topology.clone(),
            reduce: self.reduce.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> ReduceSender<T> {
    pub(crate) fn new(topology: OperatorTopology<T>, reduce: Arc<dyn ReduceFunction<T>>) -> Self {
        Self { topology, reduce }
    }

    /// Contribute `value` to the reduction
    pub async fn send(&self, value: T) -> Result<()> {
        let combined = if self.topology.has_children() {
            let subtree = self.topology.receive_from_children(&*self.reduce).await?;
            self.reduce.reduce(vec![value, subtree])?
        } else {
            value
        };
        self.topology
            .send_to_parent(&combined, MessageKind::Data)
            .await
    }
}

/// Root half of a reduce operator: collects and combines every contribution.
pub struct ReduceReceiver<T> {
    topology: OperatorTopology<T>,
    reduce: Arc<dyn ReduceFunction<T>>,
}

impl<T> Clone for ReduceReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            topology: self.topology.clone(),
            reduce: self.reduce.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> ReduceReceiver<T> {
    pub(crate) fn new(topology: OperatorTopology<T>, reduce: Arc<dyn ReduceFunction<T>>) -> Self {
        Self { topology, reduce }
    }

    /// Block until every child's contribution arrived, then combine them in
    /// arrival order. The root's own element is not part of the reduction.
    pub async fn reduce(&self) -> Result<T> {
        self.topology.receive_from_children(&*self.reduce).await
    }
}
