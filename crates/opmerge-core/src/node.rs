//! Node payloads carried by the conversion graph.
//!
//! A [`Node`] is deliberately thin: an opaque [`NodeKind`] discriminator, an
//! opaque parameter blob, a diagnostic name, and the names of its output
//! slots. Producer references are not stored here -- they are edges of the
//! arena in [`ConvertGraph`](crate::graph::ConvertGraph), which is what lets
//! the graph keep a producer->consumer index without back-pointers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix for operators the source framework importer could not map.
const EXTRA_PREFIX: &str = "Extra";

/// Opaque operator discriminator, e.g. `"Extra:Tensorflow:Foo"` or `"Conv2D"`.
///
/// The engine never interprets kinds beyond the two conventions below:
/// `Extra:<engine>:<op_type>` for foreign operators and [`NodeKind::CONST`]
/// for constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKind(String);

impl NodeKind {
    /// Kind string used for constant nodes.
    pub const CONST: &'static str = "Const";

    pub fn new(kind: impl Into<String>) -> Self {
        NodeKind(kind.into())
    }

    /// Builds a foreign-operator kind `Extra:<engine>:<op_type>`.
    pub fn extra(engine: &str, op_type: &str) -> Self {
        NodeKind(format!("{}:{}:{}", EXTRA_PREFIX, engine, op_type))
    }

    pub fn constant() -> Self {
        NodeKind(Self::CONST.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits an `Extra:<engine>:<op_type>` kind into `(engine, op_type)`.
    ///
    /// The op type may itself contain `:`; only the first two separators are
    /// significant.
    pub fn as_extra(&self) -> Option<(&str, &str)> {
        let rest = self.0.strip_prefix(EXTRA_PREFIX)?.strip_prefix(':')?;
        let (engine, op_type) = rest.split_once(':')?;
        if engine.is_empty() || op_type.is_empty() {
            return None;
        }
        Some((engine, op_type))
    }

    pub fn is_extra(&self) -> bool {
        self.as_extra().is_some()
    }

    pub fn is_constant(&self) -> bool {
        self.0 == Self::CONST
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        NodeKind(s.to_string())
    }
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        NodeKind(s)
    }
}

/// A unit of computation in the conversion graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Operator discriminator.
    pub kind: NodeKind,
    /// Opaque attribute blob; only rules interpret it.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Diagnostic name, propagated onto replacements.
    pub name: String,
    /// Output slot names. The length is the node's output slot count.
    pub outputs: Vec<String>,
}

impl Node {
    /// Creates a single-output node whose slot carries the node's name.
    pub fn new(kind: impl Into<NodeKind>, name: impl Into<String>) -> Self {
        let name = name.into();
        Node {
            kind: kind.into(),
            params: serde_json::Value::Null,
            outputs: vec![name.clone()],
            name,
        }
    }

    /// Creates a constant node holding `value` in its params.
    pub fn constant(name: impl Into<String>, value: serde_json::Value) -> Self {
        Node::new(NodeKind::constant(), name).with_params(value)
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Replaces the output slots with the given names.
    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    /// Number of output slots.
    pub fn slot_count(&self) -> usize {
        self.outputs.len()
    }
}
