use crate::errors::Result;
use crate::id::TaskId;
use crate::topology::OperatorTopology;

/// Root half of a scatter operator: partitions an element list into
/// consecutive sublists, one per child.
#[derive(Clone)]
pub struct ScatterSender<T> {
    topology: OperatorTopology<T>,
}

impl<T: Send + Sync + 'static> ScatterSender<T> {
    pub(crate) fn new(topology: OperatorTopology<T>) -> Self {
        Self { topology }
    }

    /// Scatter with the default chunk size `ceil(N / children)`, children in
    /// declared order
    pub async fn send(&self, values: &[T]) -> Result<()> {
        self.topology.scatter_to_children(values).await
    }

    /// Scatter with an explicit chunk size
    pub async fn send_with_chunk_size(&self, values: &[T], chunk_size: usize) -> Result<()> {
        self.topology
            .scatter_with_chunk_size(values, chunk_size)
            .await
    }

    /// Scatter with an explicit child ordering; `order` must name each child
    /// exactly once
    pub async fn send_in_order(&self, values: &[T], order: &[TaskId]) -> Result<()> {
        self.topology.scatter_in_order(values, order).await
    }
}

/// Receiving half of a scatter operator.
#[derive(Clone)]
pub struct ScatterReceiver<T> {
    topology: OperatorTopology<T>,
}

impl<T: Send + Sync + 'static> ScatterReceiver<T> {
    pub(crate) fn new(topology: OperatorTopology<T>) -> Self {
        Self { topology }
    }

    /// Block until this task's sublist arrives and decode it
    pub async fn receive(&self) -> Result<Vec<T>> {
        self.topology.receive_list_from_parent().await
    }
}
