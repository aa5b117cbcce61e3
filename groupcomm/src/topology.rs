//! Per-operator view of the communication tree and the collective
//! primitives built over it.
//!
//! Each task sees one parent channel (absent on the root) and an ordered
//! list of child channels. Inbound messages are appended to the matching
//! per-peer mailbox and the mailbox is flagged on a shared ready queue; a
//! reducer waiting on "any child has data" blocks on that queue instead of
//! polling every child.

use crate::channel::NodeChannel;
use crate::codec::{Codec, ReduceFunction};
use crate::config::{OperatorConfig, NAME_RESOLUTION_BACKOFF};
use crate::errors::{GroupCommError, Result};
use crate::id::{Endpoint, TaskId};
use crate::message::{GroupCommMessage, MessageKind, PayloadList};
use crate::name_service::NameService;
use crate::transport::Sender;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STATE_UNINITIALIZED: u8 = 0;
const STATE_INITIALIZED: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Untyped topology state shared between the typed operator handle and the
/// inbound message router.
pub(crate) struct TopologyCore {
    self_id: TaskId,
    group_name: String,
    operator_name: String,
    parent: Option<Arc<NodeChannel>>,
    children: Vec<Arc<NodeChannel>>,
    peers: HashMap<TaskId, Arc<NodeChannel>>,
    /// Serializes mailbox appends with the ready-queue scan; held only
    /// across constant-time operations.
    coord: Mutex<()>,
    ready_tx: mpsc::UnboundedSender<Arc<NodeChannel>>,
    ready_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<NodeChannel>>>,
    state: AtomicU8,
    timeout: std::time::Duration,
    retry_count: u32,
    name_service: Arc<dyn NameService>,
    sender: Sender,
    cancel: CancellationToken,
}

impl TopologyCore {
    pub(crate) fn new(
        config: &OperatorConfig,
        name_service: Arc<dyn NameService>,
        sender: Sender,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        if config.self_task_id.is_empty() {
            return Err(GroupCommError::InvalidArgument(
                "self task id must not be empty".to_string(),
            ));
        }

        let parent = config
            .parent_id()
            .map(|id| NodeChannel::new(id.clone()));

        let mut children = Vec::with_capacity(config.child_task_ids.len());
        let mut peers: HashMap<TaskId, Arc<NodeChannel>> = HashMap::new();
        if let Some(channel) = &parent {
            peers.insert(channel.peer_id().clone(), channel.clone());
        }
        for child_id in &config.child_task_ids {
            if *child_id == config.self_task_id {
                return Err(GroupCommError::InvalidArgument(format!(
                    "task {} cannot be its own child",
                    child_id
                )));
            }
            let channel = NodeChannel::new(child_id.clone());
            if peers.insert(child_id.clone(), channel.clone()).is_some() {
                return Err(GroupCommError::InvalidArgument(format!(
                    "peer {} appears more than once in the topology",
                    child_id
                )));
            }
            children.push(channel);
        }

        let (ready_tx, ready_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            self_id: config.self_task_id.clone(),
            group_name: config.group_name.clone(),
            operator_name: config.operator_name.clone(),
            parent,
            children,
            peers,
            coord: Mutex::new(()),
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
            state: AtomicU8::new(STATE_UNINITIALIZED),
            timeout: config.timeout(),
            retry_count: config.retry_count,
            name_service,
            sender,
            cancel,
        }))
    }

    pub(crate) fn group_name(&self) -> &str {
        &self.group_name
    }

    pub(crate) fn operator_name(&self) -> &str {
        &self.operator_name
    }

    pub(crate) fn self_id(&self) -> &TaskId {
        &self.self_id
    }

    pub(crate) fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub(crate) fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub(crate) fn child_ids(&self) -> Vec<TaskId> {
        self.children
            .iter()
            .map(|c| c.peer_id().clone())
            .collect()
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state.load(Ordering::SeqCst) {
            STATE_INITIALIZED => Ok(()),
            STATE_CLOSED => Err(GroupCommError::Closed),
            _ => Err(GroupCommError::NotInitialized),
        }
    }

    /// Resolve every peer through the name service, parent first, then
    /// children in declared order. Blocks until all peers are registered or
    /// the per-peer lookup attempts are exhausted.
    pub(crate) async fn initialize(&self) -> Result<()> {
        match self.state.load(Ordering::SeqCst) {
            STATE_CLOSED => return Err(GroupCommError::Closed),
            STATE_INITIALIZED => {
                debug!(
                    group = %self.group_name,
                    operator = %self.operator_name,
                    "Operator already initialized"
                );
                return Ok(());
            }
            _ => {}
        }

        for channel in self.parent.iter().chain(self.children.iter()) {
            self.resolve_peer(channel.peer_id()).await?;
        }

        self.state.store(STATE_INITIALIZED, Ordering::SeqCst);
        info!(
            group = %self.group_name,
            operator = %self.operator_name,
            self_id = %self.self_id,
            peers = self.peers.len(),
            "Operator topology initialized"
        );
        Ok(())
    }

    async fn resolve_peer(&self, peer: &TaskId) -> Result<Endpoint> {
        for attempt in 1..=self.retry_count {
            match self.name_service.lookup(peer).await {
                Ok(Some(endpoint)) => {
                    debug!(peer = %peer, endpoint = %endpoint, attempt, "Resolved peer");
                    return Ok(endpoint);
                }
                Ok(None) => {
                    debug!(peer = %peer, attempt, "Peer not yet registered");
                }
                Err(e) => {
                    warn!(peer = %peer, attempt, error = %e, "Name service lookup failed");
                }
            }
            if attempt < self.retry_count {
                tokio::select! {
                    _ = sleep(NAME_RESOLUTION_BACKOFF) => {}
                    _ = self.cancel.cancelled() => return Err(GroupCommError::Cancelled),
                }
            }
        }
        Err(GroupCommError::Initialization(peer.clone()))
    }

    /// Inbound dispatch hook: append the message's payloads to the source
    /// peer's mailbox and flag the mailbox on the ready queue.
    ///
    /// Both effects happen under the coordination lock so that a waiter
    /// draining stale ready entries cannot miss a concurrent arrival.
    /// Messages may arrive before `initialize` returns; they are buffered.
    pub(crate) fn on_message(&self, message: GroupCommMessage) -> Result<()> {
        if self.state.load(Ordering::SeqCst) == STATE_CLOSED {
            return Err(GroupCommError::Closed);
        }
        if message.source.is_empty() {
            return Err(GroupCommError::MalformedMessage(
                "message has no source".to_string(),
            ));
        }
        if message.payloads.is_empty() {
            return Err(GroupCommError::MalformedMessage(format!(
                "message {} from {} carries no payloads",
                message.message_id, message.source
            )));
        }
        let channel = self
            .peers
            .get(&message.source)
            .ok_or_else(|| GroupCommError::UnknownPeer(message.source.clone()))?;

        {
            let _guard = self.coord.lock().expect("coordination lock poisoned");
            channel.push(message.payloads);
            // Receiver half lives in self, so this only fails after close.
            let _ = self.ready_tx.send(channel.clone());
        }

        debug!(
            message_id = %message.message_id,
            group = %self.group_name,
            operator = %self.operator_name,
            source = %message.source,
            "Message enqueued"
        );
        Ok(())
    }

    /// Wait until at least one child in `pending` has a queued message.
    ///
    /// Scans the pending mailboxes under the coordination lock; if none has
    /// data, drains stale ready entries (still under the lock) and parks on
    /// the ready queue. A wakeup for a peer outside `pending` keeps waiting
    /// without restarting the scan, so wakeups for other peers are not
    /// dropped on the floor.
    async fn wait_for_any(
        &self,
        pending: &HashSet<TaskId>,
        deadline: Instant,
    ) -> Result<Vec<Arc<NodeChannel>>> {
        let mut ready_rx = self.ready_rx.lock().await;
        loop {
            {
                let _guard = self.coord.lock().expect("coordination lock poisoned");
                let ready: Vec<Arc<NodeChannel>> = self
                    .children
                    .iter()
                    .filter(|c| pending.contains(c.peer_id()) && c.has_message())
                    .cloned()
                    .collect();
                if !ready.is_empty() {
                    return Ok(ready);
                }
                while ready_rx.try_recv().is_ok() {}
            }

            loop {
                let woken = tokio::select! {
                    res = timeout_at(deadline, ready_rx.recv()) => match res {
                        Ok(Some(channel)) => channel,
                        Ok(None) => return Err(GroupCommError::Closed),
                        Err(_) => {
                            let mut peers: Vec<TaskId> = pending.iter().cloned().collect();
                            peers.sort();
                            return Err(GroupCommError::ReceiveTimeout { peers });
                        }
                    },
                    _ = self.cancel.cancelled() => return Err(GroupCommError::Cancelled),
                };
                if pending.contains(woken.peer_id()) {
                    break;
                }
            }
        }
    }

    async fn send_to_peer(
        &self,
        destination: &TaskId,
        kind: MessageKind,
        payloads: PayloadList,
    ) -> Result<()> {
        let message = GroupCommMessage::new(
            self.group_name.clone(),
            self.operator_name.clone(),
            self.self_id.clone(),
            destination.clone(),
            kind,
            payloads,
        );
        self.sender.send(message).await
    }

    /// Move to `Closed`, waking every parked receive. Idempotent.
    pub(crate) fn close(&self) {
        let previous = self.state.swap(STATE_CLOSED, Ordering::SeqCst);
        if previous != STATE_CLOSED {
            info!(
                group = %self.group_name,
                operator = %self.operator_name,
                "Operator topology closed"
            );
            self.cancel.cancel();
        }
    }
}

/// Typed handle over one operator topology.
///
/// Cheap to clone; all clones share the same channels and lifecycle. The
/// codec attached at registration bridges element values and payload bytes.
pub struct OperatorTopology<T> {
    core: Arc<TopologyCore>,
    codec: Arc<dyn Codec<T>>,
}

impl<T> Clone for OperatorTopology<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> OperatorTopology<T> {
    pub(crate) fn new(core: Arc<TopologyCore>, codec: Arc<dyn Codec<T>>) -> Self {
        Self { core, codec }
    }

    pub fn group_name(&self) -> &str {
        self.core.group_name()
    }

    pub fn operator_name(&self) -> &str {
        self.core.operator_name()
    }

    pub fn self_id(&self) -> &TaskId {
        self.core.self_id()
    }

    /// True iff this task is not the topology root
    pub fn has_parent(&self) -> bool {
        self.core.has_parent()
    }

    /// True iff this task is an interior or root node
    pub fn has_children(&self) -> bool {
        self.core.has_children()
    }

    /// Children in driver-declared order
    pub fn child_ids(&self) -> Vec<TaskId> {
        self.core.child_ids()
    }

    /// Resolve all peers through the name service. Must complete before any
    /// send or receive.
    pub async fn initialize(&self) -> Result<()> {
        self.core.initialize().await
    }

    /// Tear the topology down, waking all parked receives
    pub fn close(&self) {
        self.core.close()
    }

    /// Encode `value` and send it to the parent task
    pub async fn send_to_parent(&self, value: &T, kind: MessageKind) -> Result<()> {
        self.core.ensure_ready()?;
        let parent = self.core.parent.as_ref().ok_or(GroupCommError::NoParent)?;
        let encoded = self.codec.encode(value)?;
        self.core
            .send_to_peer(parent.peer_id(), kind, vec![encoded])
            .await
    }

    /// Encode `value` once and send one copy to each child, in declared
    /// order. A leaf sends nothing.
    pub async fn send_to_children(&self, value: &T, kind: MessageKind) -> Result<()> {
        self.core.ensure_ready()?;
        let encoded = self.codec.encode(value)?;
        for child in &self.core.children {
            self.core
                .send_to_peer(child.peer_id(), kind, vec![encoded.clone()])
                .await?;
        }
        Ok(())
    }

    /// Send an element list to the parent as a single multi-payload message
    pub async fn send_list_to_parent(&self, values: &[T], kind: MessageKind) -> Result<()> {
        self.core.ensure_ready()?;
        let parent = self.core.parent.as_ref().ok_or(GroupCommError::NoParent)?;
        let payloads = self.encode_all(values)?;
        self.core.send_to_peer(parent.peer_id(), kind, payloads).await
    }

    /// Send the same element list to every child
    pub async fn send_list_to_children(&self, values: &[T], kind: MessageKind) -> Result<()> {
        self.core.ensure_ready()?;
        let payloads = self.encode_all(values)?;
        for child in &self.core.children {
            self.core
                .send_to_peer(child.peer_id(), kind, payloads.clone())
                .await?;
        }
        Ok(())
    }

    fn encode_all(&self, values: &[T]) -> Result<PayloadList> {
        if values.is_empty() {
            return Err(GroupCommError::InvalidArgument(
                "element list must not be empty".to_string(),
            ));
        }
        values.iter().map(|v| self.codec.encode(v)).collect()
    }

    /// Partition `values` into consecutive sublists of `ceil(N / children)`
    /// elements and send one sublist to each child in declared order
    pub async fn scatter_to_children(&self, values: &[T]) -> Result<()> {
        self.core.ensure_ready()?;
        let targets = self.core.children.clone();
        if targets.is_empty() {
            return Err(GroupCommError::NoChildren);
        }
        if values.is_empty() {
            return Ok(());
        }
        let chunk_size = values.len().div_ceil(targets.len());
        self.scatter_impl(values, chunk_size, &targets).await
    }

    /// Scatter with an explicit chunk size; children in declared order
    pub async fn scatter_with_chunk_size(&self, values: &[T], chunk_size: usize) -> Result<()> {
        self.core.ensure_ready()?;
        if chunk_size == 0 {
            return Err(GroupCommError::InvalidArgument(
                "chunk size must be positive".to_string(),
            ));
        }
        let targets = self.core.children.clone();
        if targets.is_empty() {
            return Err(GroupCommError::NoChildren);
        }
        self.scatter_impl(values, chunk_size, &targets).await
    }

    /// Scatter with the default chunk size but an explicit child ordering.
    /// `order` must name each child exactly once.
    pub async fn scatter_in_order(&self, values: &[T], order: &[TaskId]) -> Result<()> {
        self.core.ensure_ready()?;
        if self.core.children.is_empty() {
            return Err(GroupCommError::NoChildren);
        }
        if order.len() != self.core.children.len() {
            return Err(GroupCommError::InvalidArgument(format!(
                "order lists {} peers but the topology has {} children",
                order.len(),
                self.core.children.len()
            )));
        }
        let mut targets = Vec::with_capacity(order.len());
        let mut seen: HashSet<&TaskId> = HashSet::new();
        for id in order {
            let channel = self
                .core
                .peers
                .get(id)
                .ok_or_else(|| GroupCommError::UnknownPeer(id.clone()))?;
            if !seen.insert(id) {
                return Err(GroupCommError::InvalidArgument(format!(
                    "order lists peer {} more than once",
                    id
                )));
            }
            targets.push(channel.clone());
        }
        if values.is_empty() {
            return Ok(());
        }
        let chunk_size = values.len().div_ceil(targets.len());
        self.scatter_impl(values, chunk_size, &targets).await
    }

    /// Child i receives `values[i*chunk .. min((i+1)*chunk, N)]` as one
    /// multi-payload message; children whose sublist would be empty receive
    /// nothing this call.
    async fn scatter_impl(
        &self,
        values: &[T],
        chunk_size: usize,
        targets: &[Arc<NodeChannel>],
    ) -> Result<()> {
        for (i, target) in targets.iter().enumerate() {
            let start = i * chunk_size;
            if start >= values.len() {
                break;
            }
            let end = usize::min(start + chunk_size, values.len());
            let payloads: PayloadList = values[start..end]
                .iter()
                .map(|v| self.codec.encode(v))
                .collect::<Result<_>>()?;
            self.core
                .send_to_peer(target.peer_id(), MessageKind::Data, payloads)
                .await?;
        }
        Ok(())
    }

    /// Take the next message from the parent and decode its single element
    pub async fn receive_from_parent(&self) -> Result<T> {
        let payloads = self.take_from_parent().await?;
        if payloads.len() != 1 {
            return Err(GroupCommError::Protocol(format!(
                "expected exactly one payload from parent, got {}",
                payloads.len()
            )));
        }
        self.codec.decode(&payloads[0])
    }

    /// Take the next message from the parent and decode every element
    pub async fn receive_list_from_parent(&self) -> Result<Vec<T>> {
        let payloads = self.take_from_parent().await?;
        if payloads.is_empty() {
            return Err(GroupCommError::Protocol(
                "expected at least one payload from parent".to_string(),
            ));
        }
        payloads.iter().map(|p| self.codec.decode(p)).collect()
    }

    async fn take_from_parent(&self) -> Result<PayloadList> {
        self.core.ensure_ready()?;
        let parent = self
            .core
            .parent
            .clone()
            .ok_or(GroupCommError::NoParent)?;
        let deadline = Instant::now() + self.core.timeout;
        match timeout_at(deadline, parent.take(&self.core.cancel)).await {
            Ok(result) => result,
            Err(_) => Err(GroupCommError::ReceiveTimeout {
                peers: vec![parent.peer_id().clone()],
            }),
        }
    }

    /// Collect one element from every child and combine them.
    ///
    /// Elements are passed to `reduce` in arrival order, so a
    /// non-commutative reduce function yields non-deterministic results.
    pub async fn receive_from_children<R>(&self, reduce: &R) -> Result<T>
    where
        R: ReduceFunction<T> + ?Sized,
    {
        self.core.ensure_ready()?;
        if self.core.children.is_empty() {
            return Err(GroupCommError::NoChildren);
        }
        let deadline = Instant::now() + self.core.timeout;
        let mut pending: HashSet<TaskId> = self.core.child_ids().into_iter().collect();
        let mut received = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            for channel in self.core.wait_for_any(&pending, deadline).await? {
                let Some(payloads) = channel.try_take() else {
                    continue;
                };
                if payloads.len() != 1 {
                    return Err(GroupCommError::Protocol(format!(
                        "expected exactly one payload from child {}, got {}",
                        channel.peer_id(),
                        payloads.len()
                    )));
                }
                received.push(self.codec.decode(&payloads[0])?);
                pending.remove(channel.peer_id());
            }
        }
        reduce.reduce(received)
    }

    /// Collect one message from every child, in arrival order, decoding all
    /// of each message's elements. Supports gather-style operators where a
    /// child forwards its whole subtree as one multi-payload message.
    pub async fn gather_from_children(&self) -> Result<Vec<(TaskId, Vec<T>)>> {
        self.core.ensure_ready()?;
        if self.core.children.is_empty() {
            return Err(GroupCommError::NoChildren);
        }
        let deadline = Instant::now() + self.core.timeout;
        let mut pending: HashSet<TaskId> = self.core.child_ids().into_iter().collect();
        let mut received = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            for channel in self.core.wait_for_any(&pending, deadline).await? {
                let Some(payloads) = channel.try_take() else {
                    continue;
                };
                if payloads.is_empty() {
                    return Err(GroupCommError::Protocol(format!(
                        "expected at least one payload from child {}",
                        channel.peer_id()
                    )));
                }
                let elements = payloads
                    .iter()
                    .map(|p| self.codec.decode(p))
                    .collect::<Result<Vec<T>>>()?;
                received.push((channel.peer_id().clone(), elements));
                pending.remove(channel.peer_id());
            }
        }
        Ok(received)
    }
}
