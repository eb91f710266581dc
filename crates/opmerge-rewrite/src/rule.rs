//! The predicate/rewrite contract rule authors implement.
//!
//! A [`Rule`] answers two questions about one node: does it apply
//! ([`Rule::matches`]) and, if so, what should replace the node
//! ([`Rule::rewrite`]). Both receive a shared borrow of the graph. A rewrite
//! does not allocate into the graph; it describes the replacement as a
//! [`Replacement`] subgraph that the merge pass validates and commits. A
//! declined or malformed rewrite therefore leaves nothing behind.

use smallvec::SmallVec;

use opmerge_core::{ConvertGraph, Node, NodeId, OutputRef};

/// One conversion case: a predicate plus the rewrite it guards.
///
/// Rules are registered once and shared for the life of the process, so they
/// must be `Send + Sync` and hold no per-pass state.
pub trait Rule: Send + Sync {
    /// Name used in diagnostics and logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Returns `true` if this rule applies to `node`. Must be side-effect free.
    ///
    /// A `true` answer promises that [`rewrite`](Self::rewrite) is prepared to
    /// handle this exact node, even if it then declines because an input is
    /// not ready yet.
    fn matches(&self, graph: &ConvertGraph, node: NodeId) -> bool;

    /// Describes the replacement for a matched node.
    ///
    /// The replacement root must expose as many output slots as `node`. Its
    /// name and slot names are overwritten with the original's on commit.
    fn rewrite(&self, graph: &ConvertGraph, node: NodeId) -> Result<Replacement, RewriteError>;
}

/// Why a matched rule produced no replacement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteError {
    /// The node is not rewritable yet (typically an input that must be a
    /// constant is not one). Retried on the next scan.
    #[error("rewrite declined: {reason}")]
    Declined { reason: String },

    /// The rule broke its own contract. The node is not retried.
    #[error("rewrite invariant violated: {reason}")]
    Invariant { reason: String },
}

impl RewriteError {
    pub fn declined(reason: impl Into<String>) -> Self {
        RewriteError::Declined {
            reason: reason.into(),
        }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        RewriteError::Invariant {
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Replacement subgraphs
// ---------------------------------------------------------------------------

/// An input of a planned node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// An output of a node already in the graph.
    Existing(OutputRef),
    /// An output of an earlier node in the same replacement.
    Planned { index: usize, slot: u16 },
}

impl From<OutputRef> for Input {
    fn from(r: OutputRef) -> Self {
        Input::Existing(r)
    }
}

impl From<NodeId> for Input {
    fn from(id: NodeId) -> Self {
        Input::Existing(id.into())
    }
}

/// Handle to a node added to a [`ReplacementBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Planned(usize);

impl Planned {
    /// Position of the node in the replacement.
    pub fn index(self) -> usize {
        self.0
    }

    /// Reference to one of this planned node's output slots.
    pub fn output(self, slot: u16) -> Input {
        Input::Planned {
            index: self.0,
            slot,
        }
    }
}

impl From<Planned> for Input {
    fn from(p: Planned) -> Self {
        p.output(0)
    }
}

/// A node waiting to be allocated, with its ordered inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedNode {
    pub node: Node,
    pub inputs: SmallVec<[Input; 4]>,
}

/// A replacement subgraph: planned nodes in allocation order plus the index
/// of the root that takes over the replaced node's outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    nodes: Vec<PlannedNode>,
    root: usize,
}

impl Replacement {
    pub fn builder() -> ReplacementBuilder {
        ReplacementBuilder::default()
    }

    /// A one-node replacement.
    pub fn single<I>(node: Node, inputs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Input>,
    {
        let mut builder = ReplacementBuilder::default();
        let root = builder.add(node, inputs);
        builder.finish(root)
    }

    pub fn nodes(&self) -> &[PlannedNode] {
        &self.nodes
    }

    pub fn root_index(&self) -> usize {
        self.root
    }

    /// The root's planned node, if the root index is in range.
    pub fn root(&self) -> Option<&PlannedNode> {
        self.nodes.get(self.root)
    }

    pub(crate) fn into_parts(self) -> (Vec<PlannedNode>, usize) {
        (self.nodes, self.root)
    }
}

/// Builds a [`Replacement`] node by node.
#[derive(Debug, Clone, Default)]
pub struct ReplacementBuilder {
    nodes: Vec<PlannedNode>,
}

impl ReplacementBuilder {
    /// Plans a node. Inputs may reference existing graph outputs or earlier
    /// planned nodes.
    pub fn add<I>(&mut self, node: Node, inputs: I) -> Planned
    where
        I: IntoIterator,
        I::Item: Into<Input>,
    {
        self.nodes.push(PlannedNode {
            node,
            inputs: inputs.into_iter().map(Into::into).collect(),
        });
        Planned(self.nodes.len() - 1)
    }

    /// Seals the subgraph with `root` as the node that takes over.
    pub fn finish(self, root: Planned) -> Replacement {
        Replacement {
            nodes: self.nodes,
            root: root.0,
        }
    }
}
