//! Typed operator façades over [`OperatorTopology`](crate::OperatorTopology).
//!
//! Each collective is split into a sender half and a receiver half, matching
//! the role a task plays in the operator tree. The façades compose the
//! topology primitives so that multi-level trees work transparently: interior
//! nodes forward broadcasts downstream and fold their subtree into reductions
//! before passing them up.

mod all_gather;
mod broadcast;
mod gather;
mod reduce;
mod scatter;

pub use all_gather::AllGather;
pub use broadcast::{BroadcastReceiver, BroadcastSender};
pub use gather::{GatherReceiver, GatherSender};
pub use reduce::{ReduceReceiver, ReduceSender};
pub use scatter::{ScatterReceiver, ScatterSender};
