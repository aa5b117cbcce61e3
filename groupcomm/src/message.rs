//! Framed message envelope exchanged between tasks of a communication group.
//!
//! The engine treats payloads as opaque byte strings; the envelope carries
//! only what the router needs to dispatch and what topologies need to order
//! and validate arrivals.

use crate::errors::{GroupCommError, Result};
use crate::id::TaskId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum encoded size of a framed message (10MB)
pub const MESSAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024;

/// One entry in a per-peer mailbox: the payload list of a single message.
pub type PayloadList = Vec<Vec<u8>>;

/// Message class carried in the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Application data produced by a collective
    Data,
    /// Engine-internal coordination traffic
    Control,
}

/// Wire envelope for one point-to-point message within an operator topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCommMessage {
    /// Unique id for log correlation across sender and receiver
    pub message_id: Uuid,
    /// Logical communication group
    pub group_name: String,
    /// Operator instance within the group
    pub operator_name: String,
    /// Sender's task identifier
    pub source: TaskId,
    /// Intended recipient
    pub destination: TaskId,
    pub kind: MessageKind,
    /// One or more opaque blobs; most operators use exactly one, scatter and
    /// gather use one sublist
    pub payloads: PayloadList,
}

impl GroupCommMessage {
    pub fn new(
        group_name: impl Into<String>,
        operator_name: impl Into<String>,
        source: TaskId,
        destination: TaskId,
        kind: MessageKind,
        payloads: PayloadList,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            group_name: group_name.into(),
            operator_name: operator_name.into(),
            source,
            destination,
            kind,
            payloads,
        }
    }

    /// Routing key extracted from the envelope
    pub fn route_key(&self) -> (String, String) {
        (self.group_name.clone(), self.operator_name.clone())
    }

    /// Approximate size of the payload portion in bytes
    pub fn payload_bytes(&self) -> usize {
        self.payloads.iter().map(Vec::len).sum()
    }

    /// Serialize to CBOR bytes
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| GroupCommError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| GroupCommError::Serialization(e.to_string()))
    }
}

/// Encode a message as a length-prefixed CBOR frame (u32 big-endian prefix).
///
/// Transport bindings that speak a stream protocol use this framing; the
/// size limit bounds what a misbehaving peer can make a receiver allocate.
pub fn encode_frame(message: &GroupCommMessage) -> Result<Vec<u8>> {
    let body = message.to_cbor()?;
    if body.len() > MESSAGE_SIZE_LIMIT {
        return Err(GroupCommError::Serialization(format!(
            "message size {} exceeds limit {}",
            body.len(),
            MESSAGE_SIZE_LIMIT
        )));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a length-prefixed CBOR frame produced by [`encode_frame`].
pub fn decode_frame(bytes: &[u8]) -> Result<GroupCommMessage> {
    if bytes.len() < 4 {
        return Err(GroupCommError::MalformedMessage(
            "frame shorter than length prefix".to_string(),
        ));
    }
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(&bytes[..4]);
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MESSAGE_SIZE_LIMIT {
        return Err(GroupCommError::MalformedMessage(format!(
            "frame length {} exceeds limit {}",
            len, MESSAGE_SIZE_LIMIT
        )));
    }
    if bytes.len() < 4 + len {
        return Err(GroupCommError::MalformedMessage(format!(
            "frame truncated: expected {} payload bytes, got {}",
            len,
            bytes.len() - 4
        )));
    }
    GroupCommMessage::from_cbor(&bytes[4..4 + len])
}
