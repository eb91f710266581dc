//! Core error types for opmerge-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the graph arena.

use thiserror::Error;

use crate::id::{EdgeId, NodeId};

/// Errors produced by [`ConvertGraph`](crate::graph::ConvertGraph) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The id does not name a live node (never allocated, or retired).
    #[error("node not found: NodeId({id})")]
    NodeNotFound { id: NodeId },

    /// A reference named an output slot the producer does not have.
    #[error("slot out of range: node {node} has {slots} output slot(s), slot {slot} requested")]
    SlotOutOfRange { node: NodeId, slot: u16, slots: usize },

    /// An edge no longer exists or no longer binds what the caller expected.
    #[error("edge not found: EdgeId({edge})")]
    EdgeNotFound { edge: EdgeId },

    /// Attempted to retire a node that consumers or graph outputs still use.
    #[error("node {id} is still referenced by {consumers} consumer(s) or a graph output")]
    StillReferenced { id: NodeId, consumers: usize },

    /// A node was given more inputs than input ports can address.
    #[error("too many inputs: {count} given, at most {max} input ports")]
    TooManyInputs { count: usize, max: usize },

    /// The data edges contain a cycle through this node.
    #[error("cycle detected through node {node}")]
    Cycle { node: NodeId },
}
