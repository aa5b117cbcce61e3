//! Per-peer mailbox: an ordered queue of received payload lists with a
//! cancellation-safe blocking take.

use crate::errors::{GroupCommError, Result};
use crate::id::TaskId;
use crate::message::PayloadList;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Concurrent FIFO mailbox dedicated to messages arriving from one peer.
///
/// Push and take are linearizable per channel; messages from the peer are
/// observed in the order the dispatch hook appended them. Each channel has
/// at most one logical receiver, enforced by the collective algorithms.
pub struct NodeChannel {
    peer_id: TaskId,
    queue: Mutex<VecDeque<PayloadList>>,
    notify: Notify,
}

impl NodeChannel {
    pub(crate) fn new(peer_id: TaskId) -> Arc<Self> {
        Arc::new(Self {
            peer_id,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        })
    }

    /// The peer this mailbox belongs to
    pub fn peer_id(&self) -> &TaskId {
        &self.peer_id
    }

    /// Append a payload list and wake any waiter. Never blocks.
    pub(crate) fn push(&self, payloads: PayloadList) {
        self.queue
            .lock()
            .expect("node channel lock poisoned")
            .push_back(payloads);
        self.notify.notify_one();
    }

    /// Remove and return the oldest entry, if any
    pub(crate) fn try_take(&self) -> Option<PayloadList> {
        self.queue
            .lock()
            .expect("node channel lock poisoned")
            .pop_front()
    }

    /// Non-blocking peek: true iff the queue is non-empty
    pub fn has_message(&self) -> bool {
        !self
            .queue
            .lock()
            .expect("node channel lock poisoned")
            .is_empty()
    }

    /// Remove and return the oldest entry, waiting until one is available.
    ///
    /// There is no timeout at this level; callers impose deadlines. Teardown
    /// of the surrounding topology surfaces as `Cancelled`.
    pub(crate) async fn take(&self, cancel: &CancellationToken) -> Result<PayloadList> {
        loop {
            if let Some(payloads) = self.try_take() {
                return Ok(payloads);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return Err(GroupCommError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let ch = NodeChannel::new(TaskId::new("peer"));
        ch.push(vec![vec![1]]);
        ch.push(vec![vec![2]]);
        ch.push(vec![vec![3]]);
        assert_eq!(ch.try_take().unwrap(), vec![vec![1]]);
        assert_eq!(ch.try_take().unwrap(), vec![vec![2]]);
        assert_eq!(ch.try_take().unwrap(), vec![vec![3]]);
        assert!(ch.try_take().is_none());
    }

    #[test]
    fn test_has_message() {
        let ch = NodeChannel::new(TaskId::new("peer"));
        assert!(!ch.has_message());
        ch.push(vec![vec![0]]);
        assert!(ch.has_message());
        ch.try_take();
        assert!(!ch.has_message());
    }

    #[tokio::test]
    async fn test_take_returns_queued_entry() {
        let ch = NodeChannel::new(TaskId::new("peer"));
        let cancel = CancellationToken::new();
        ch.push(vec![vec![7]]);
        assert_eq!(ch.take(&cancel).await.unwrap(), vec![vec![7]]);
    }

    #[tokio::test]
    async fn test_take_blocks_until_push() {
        let ch = NodeChannel::new(TaskId::new("peer"));
        let cancel = CancellationToken::new();

        let taker = {
            let ch = ch.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ch.take(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        ch.push(vec![vec![42]]);

        let payloads = taker.await.unwrap().unwrap();
        assert_eq!(payloads, vec![vec![42]]);
    }

    #[tokio::test]
    async fn test_take_wakes_on_cancel() {
        let ch = NodeChannel::new(TaskId::new("peer"));
        let cancel = CancellationToken::new();

        let taker = {
            let ch = ch.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ch.take(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = taker.await.unwrap();
        assert!(matches!(result, Err(GroupCommError::Cancelled)));
    }

    #[tokio::test]
    async fn test_push_before_waiter_is_not_lost() {
        let ch = NodeChannel::new(TaskId::new("peer"));
        let cancel = CancellationToken::new();
        ch.push(vec![vec![1]]);
        ch.push(vec![vec![2]]);
        assert_eq!(ch.take(&cancel).await.unwrap(), vec![vec![1]]);
        assert_eq!(ch.take(&cancel).await.unwrap(), vec![vec![2]]);
    }
}
