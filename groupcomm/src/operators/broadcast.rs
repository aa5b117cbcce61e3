use crate::errors::Result;
use crate::message::MessageKind;
use crate::topology::OperatorTopology;

/// Root half of a broadcast operator: pushes one value to every task in the
/// group.
#[derive(Clone)]
pub struct BroadcastSender<T> {
    topology: OperatorTopology<T>,
}

impl<T: Send + Sync + 'static> BroadcastSender<T> {
    pub(crate) fn new(topology: OperatorTopology<T>) -> Self {
        Self { topology }
    }

    /// Send `value` to every child; descendants receive it through their own
    /// receivers' forwarding.
    pub async fn send(&self, value: &T) -> Result<()> {
        self.topology.send_to_children(value, MessageKind::Data).await
    }
}

/// Non-root half of a broadcast operator.
#[derive(Clone)]
pub struct BroadcastReceiver<T> {
    topology: OperatorTopology<T>,
}

impl<T: Send + Sync + 'static> BroadcastReceiver<T> {
    pub(crate) fn new(topology: OperatorTopology<T>) -> Self {
        Self { topology }
    }

    /// Block until the broadcast value arrives from the parent. Interior
    /// nodes forward the value to their children before returning it.
    pub async fn receive(&self) -> Result<T> {
        let value = self.topology.receive_from_parent().await?;
        if self.topology.has_children() {
            self.topology
                .send_to_children(&value, MessageKind::Data)
                .await?;
        }
        Ok(value)
    }
}
