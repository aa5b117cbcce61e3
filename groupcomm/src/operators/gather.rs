use crate::errors::Result;
use crate::message::MessageKind;
use crate::topology::OperatorTopology;

/// Contributing half of a gather operator.
///
/// Interior nodes bundle their own element with everything arriving from
/// their subtree and forward the bundle upstream as one message.
#[derive(Clone)]
pub struct GatherSender<T> {
    topology: OperatorTopology<T>,
}

impl<T: Send + Sync + 'static> GatherSender<T> {
    pub(crate) fn new(topology: OperatorTopology<T>) -> Self {
        Self { topology }
    }

    /// Contribute `element` to the gather
    pub async fn send(&self, element: T) -> Result<()> {
        let mut elements = vec![element];
        if self.topology.has_children() {
            for (_, subtree) in self.topology.gather_from_children().await? {
                elements.extend(subtree);
            }
        }
        self.topology
            .send_list_to_parent(&elements, MessageKind::Data)
            .await
    }
}

/// Root half of a gather operator: collects every task's element.
#[derive(Clone)]
pub struct GatherReceiver<T> {
    topology: OperatorTopology<T>,
}

impl<T: Send + Sync + 'static> GatherReceiver<T> {
    pub(crate) fn new(topology: OperatorTopology<T>) -> Self {
        Self { topology }
    }

    /// Block until every child's bundle arrived; elements are flattened in
    /// arrival order. The root's own element is not included.
    pub async fn gather(&self) -> Result<Vec<T>> {
        let mut elements = Vec::new();
        for (_, subtree) in self.topology.gather_from_children().await? {
            elements.extend(subtree);
        }
        Ok(elements)
    }
}
