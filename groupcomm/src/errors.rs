use crate::id::TaskId;
use thiserror::Error;

/// Errors surfaced by the group communication engine.
#[derive(Error, Debug)]
pub enum GroupCommError {
    /// A peer never appeared in the name service during initialization.
    /// Fatal for the operator; the task must abort.
    #[error("initialization failed: peer {0} never appeared in the name service")]
    Initialization(TaskId),

    /// A collective was called before `initialize`
    #[error("operator used before initialize")]
    NotInitialized,

    /// A collective was called after the topology was closed
    #[error("operator topology is closed")]
    Closed,

    /// `send_to_parent` or `receive_from_parent` on the topology root
    #[error("operation requires a parent but this task is the topology root")]
    NoParent,

    /// A child-facing collective on a leaf task
    #[error("operation requires children but this task is a leaf")]
    NoChildren,

    /// A message arrived from, or was addressed to, a peer outside this
    /// operator's topology. Indicates a driver/topology inconsistency.
    #[error("peer {0} is not part of this operator's topology")]
    UnknownPeer(TaskId),

    /// An inbound message named a `(group, operator)` pair with no
    /// registered topology
    #[error("no operator registered for group '{group}' operator '{operator}'")]
    UnknownOperator { group: String, operator: String },

    /// Inbound message missing required fields
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A receive observed a payload count incompatible with the operator
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Locally invalid argument; the call is rejected and may be retried
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking receive exceeded the configured timeout. The queues are
    /// untouched and the caller may retry.
    #[error("timed out waiting for data from peers {peers:?}")]
    ReceiveTimeout { peers: Vec<TaskId> },

    /// Task-level cancellation fired while a collective was blocked
    #[error("operation cancelled")]
    Cancelled,

    /// The outbound transport reported a failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Codec or envelope encoding failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The name service could not be reached or rejected a request
    #[error("name service error: {0}")]
    NameService(String),

    /// IO error from a transport or name service binding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, GroupCommError>;

impl From<serde_json::Error> for GroupCommError {
    fn from(e: serde_json::Error) -> Self {
        GroupCommError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for GroupCommError {
    fn from(e: reqwest::Error) -> Self {
        GroupCommError::NameService(e.to_string())
    }
}
