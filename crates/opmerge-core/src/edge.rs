//! Edge payload for the conversion graph.

use serde::{Deserialize, Serialize};

/// Data dependency from a producer's output slot to a consumer's input port.
///
/// Edges run producer -> consumer, so a node's outgoing edges are its
/// consumer index and its incoming edges, ordered by `port`, are its ordered
/// producer list. An edge is a lookup relation only; it never keeps a node
/// alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    /// Which output slot of the producer.
    pub slot: u16,
    /// Which input port of the consumer.
    pub port: u16,
}

impl Binding {
    pub fn new(slot: u16, port: u16) -> Self {
        Binding { slot, port }
    }
}
