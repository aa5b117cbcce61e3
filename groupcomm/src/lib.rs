//! Task-side group communication runtime for a distributed job-execution
//! framework.
//!
//! Tasks belonging to a communication group exchange data through MPI-style
//! collective operators (broadcast, reduce, scatter, gather, all-gather)
//! arranged over a tree topology. This crate turns high-level collective
//! calls into choreographed point-to-point messages: inbound messages are
//! buffered per peer, receivers block until data arrives, and out-of-order
//! arrival across peers is tolerated while order within each peer is
//! preserved.
//!
//! The driver that computes the topology, the wire transport, and the name
//! service are external collaborators reached through traits.

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod errors;
pub mod group;
pub mod id;
pub mod message;
pub mod name_service;
pub mod operators;
pub mod router;
pub mod topology;
pub mod transport;

pub use client::{GroupCommClient, GroupCommClientBuilder};
pub use codec::{CborCodec, Codec, ReduceFunction};
pub use config::{
    GroupCommConfig, GroupConfig, OperatorConfig, OperatorKind, DEFAULT_RETRY_COUNT,
    DEFAULT_TIMEOUT_MS,
};
pub use errors::{GroupCommError, Result};
pub use group::CommunicationGroupClient;
pub use id::{Endpoint, TaskId};
pub use message::{GroupCommMessage, MessageKind};
pub use name_service::{HttpNameService, InMemoryNameService, NameService};
pub use operators::{
    AllGather, BroadcastReceiver, BroadcastSender, GatherReceiver, GatherSender, ReduceReceiver,
    ReduceSender, ScatterReceiver, ScatterSender,
};
pub use router::MessageRouter;
pub use topology::OperatorTopology;
pub use transport::{InProcessTransport, Sender, Transport};
