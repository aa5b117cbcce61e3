//! Per-group aggregation of operators and their typed accessors.

use crate::codec::ReduceFunction;
use crate::config::OperatorKind;
use crate::errors::{GroupCommError, Result};
use crate::operators::{
    AllGather, BroadcastReceiver, BroadcastSender, GatherReceiver, GatherSender, ReduceReceiver,
    ReduceSender, ScatterReceiver, ScatterSender,
};
use crate::topology::{OperatorTopology, TopologyCore};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub(crate) struct OperatorEntry {
    pub(crate) kind: OperatorKind,
    pub(crate) core: Arc<TopologyCore>,
    /// The `OperatorTopology<T>` behind a type-erased box; accessors
    /// downcast back to the element type the operator was registered with.
    pub(crate) typed: Box<dyn Any + Send + Sync>,
}

/// Aggregates the operators that share one group name and exposes typed
/// handles to them.
pub struct CommunicationGroupClient {
    group_name: String,
    operators: HashMap<String, OperatorEntry>,
}

impl CommunicationGroupClient {
    pub(crate) fn new(group_name: String) -> Self {
        Self {
            group_name,
            operators: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, name: String, entry: OperatorEntry) {
        self.operators.insert(name, entry);
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    /// Names of the operators registered in this group
    pub fn operator_names(&self) -> Vec<&str> {
        self.operators.keys().map(String::as_str).collect()
    }

    /// Initialize every operator topology in this group. Blocks until all
    /// peers of all operators are resolvable.
    pub async fn initialize(&self) -> Result<()> {
        for entry in self.operators.values() {
            entry.core.initialize().await?;
        }
        info!(
            group = %self.group_name,
            operators = self.operators.len(),
            "Communication group initialized"
        );
        Ok(())
    }

    pub(crate) fn close_all(&self) {
        for entry in self.operators.values() {
            entry.core.close();
        }
    }

    fn entry(&self, name: &str, expected: OperatorKind) -> Result<&OperatorEntry> {
        let entry =
            self.operators
                .get(name)
                .ok_or_else(|| GroupCommError::UnknownOperator {
                    group: self.group_name.clone(),
                    operator: name.to_string(),
                })?;
        if entry.kind != expected {
            return Err(GroupCommError::InvalidArgument(format!(
                "operator '{}' in group '{}' is configured as {:?}, not {:?}",
                name, self.group_name, entry.kind, expected
            )));
        }
        Ok(entry)
    }

    fn typed<T: Send + Sync + 'static>(
        &self,
        name: &str,
        expected: OperatorKind,
    ) -> Result<OperatorTopology<T>> {
        let entry = self.entry(name, expected)?;
        entry
            .typed
            .downcast_ref::<OperatorTopology<T>>()
            .cloned()
            .ok_or_else(|| {
                GroupCommError::InvalidArgument(format!(
                    "operator '{}' in group '{}' was registered with a different element type",
                    name, self.group_name
                ))
            })
    }

    /// Raw primitive access to an operator topology, regardless of kind
    pub fn operator<T: Send + Sync + 'static>(&self, name: &str) -> Result<OperatorTopology<T>> {
        let entry =
            self.operators
                .get(name)
                .ok_or_else(|| GroupCommError::UnknownOperator {
                    group: self.group_name.clone(),
                    operator: name.to_string(),
                })?;
        entry
            .typed
            .downcast_ref::<OperatorTopology<T>>()
            .cloned()
            .ok_or_else(|| {
                GroupCommError::InvalidArgument(format!(
                    "operator '{}' in group '{}' was registered with a different element type",
                    name, self.group_name
                ))
            })
    }

    pub fn broadcast_sender<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<BroadcastSender<T>> {
        Ok(BroadcastSender::new(
            self.typed(name, OperatorKind::Broadcast)?,
        ))
    }

    pub fn broadcast_receiver<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<BroadcastReceiver<T>> {
        Ok(BroadcastReceiver::new(
            self.typed(name, OperatorKind::Broadcast)?,
        ))
    }

    pub fn reduce_sender<T, R>(&self, name: &str, reduce: R) -> Result<ReduceSender<T>>
    where
        T: Send + Sync + 'static,
        R: ReduceFunction<T> + 'static,
    {
        Ok(ReduceSender::new(
            self.typed(name, OperatorKind::Reduce)?,
            Arc::new(reduce),
        ))
    }

    pub fn reduce_receiver<T, R>(&self, name: &str, reduce: R) -> Result<ReduceReceiver<T>>
    where
        T: Send + Sync + 'static,
        R: ReduceFunction<T> + 'static,
    {
        Ok(ReduceReceiver::new(
            self.typed(name, OperatorKind::Reduce)?,
            Arc::new(reduce),
        ))
    }

    pub fn scatter_sender<T: Send + Sync + 'static>(&self, name: &str) -> Result<ScatterSender<T>> {
        Ok(ScatterSender::new(self.typed(name, OperatorKind::Scatter)?))
    }

    pub fn scatter_receiver<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<ScatterReceiver<T>> {
        Ok(ScatterReceiver::new(
            self.typed(name, OperatorKind::Scatter)?,
        ))
    }

    pub fn gather_sender<T: Send + Sync + 'static>(&self, name: &str) -> Result<GatherSender<T>> {
        Ok(GatherSender::new(self.typed(name, OperatorKind::Gather)?))
    }

    pub fn gather_receiver<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<GatherReceiver<T>> {
        Ok(GatherReceiver::new(self.typed(name, OperatorKind::Gather)?))
    }

    pub fn all_gather<T: Send + Sync + 'static>(&self, name: &str) -> Result<AllGather<T>> {
        Ok(AllGather::new(self.typed(name, OperatorKind::AllGather)?))
    }
}
