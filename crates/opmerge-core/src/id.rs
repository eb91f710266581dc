//! Stable ID newtypes for graph entities.
//!
//! A [`NodeId`] pairs an arena index with the generation stamped on the node
//! when it was allocated. The arena reuses vacated indices, so the generation
//! is what tells a live node apart from a retired one that used to sit in the
//! same slot.

use std::fmt;

use petgraph::graph::{EdgeIndex, NodeIndex};
use serde::{Deserialize, Serialize};

/// Stable node identifier: arena index plus allocation generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

/// Stable edge identifier. Only meaningful until the edge is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

/// A reference to one output slot of a producer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub slot: u16,
}

impl NodeId {
    pub fn new(index: u32, generation: u32) -> Self {
        NodeId { index, generation }
    }

    /// Returns a reference to output slot `slot` of this node.
    pub fn output(self, slot: u16) -> OutputRef {
        OutputRef { node: self, slot }
    }
}

impl OutputRef {
    pub fn new(node: NodeId, slot: u16) -> Self {
        OutputRef { node, slot }
    }
}

impl From<NodeId> for OutputRef {
    /// Slot 0 of the node, the common single-output case.
    fn from(node: NodeId) -> Self {
        OutputRef { node, slot: 0 }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.slot)
    }
}

// Bridges to petgraph indices. Going from an index back to a NodeId needs the
// generation stored in the arena, so only this direction is a plain `From`.

impl From<NodeId> for NodeIndex<u32> {
    fn from(id: NodeId) -> Self {
        NodeIndex::new(id.index as usize)
    }
}

impl From<EdgeIndex<u32>> for EdgeId {
    fn from(idx: EdgeIndex<u32>) -> Self {
        EdgeId(idx.index() as u32)
    }
}

impl From<EdgeId> for EdgeIndex<u32> {
    fn from(id: EdgeId) -> Self {
        EdgeIndex::new(id.0 as usize)
    }
}
