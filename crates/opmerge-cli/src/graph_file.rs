//! JSON interchange format for conversion graphs.
//!
//! Nodes are listed producers first. Inputs and graph outputs name a node by
//! its `id` (the node name when `id` is omitted), optionally followed by
//! `:<slot>`. Exported references to an id containing `:` always spell the
//! slot out (`scope/op:1:0`):
//!
//! ```json
//! {
//!   "nodes": [
//!     { "name": "x", "kind": "Input" },
//!     { "name": "split", "kind": "Extra:Tensorflow:Unpack", "outputs": ["lo", "hi"], "inputs": ["x"] },
//!     { "name": "sum", "kind": "Add", "inputs": ["split:0", "split:1"] }
//!   ],
//!   "outputs": ["sum"]
//! }
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use opmerge_core::{ConvertGraph, CoreError, Node, NodeId, NodeKind, OutputRef};

#[derive(Debug, Error)]
pub enum GraphFileError {
    #[error("duplicate node id '{id}'")]
    DuplicateId { id: String },

    #[error("node '{node}' refers to unknown or later node '{reference}'")]
    UnknownReference { node: String, reference: String },

    #[error("graph output refers to unknown node '{reference}'")]
    UnknownOutput { reference: String },

    #[error(transparent)]
    Graph(#[from] CoreError),
}

/// One node entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
    /// Output slot names; a single slot named after the node when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
}

impl NodeEntry {
    fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphFile {
    pub nodes: Vec<NodeEntry>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Splits `"node:slot"` into its parts; a missing or non-numeric suffix means
/// slot 0 of the whole string.
fn parse_reference(reference: &str) -> (&str, u16) {
    match reference.rsplit_once(':') {
        Some((node, slot)) => match slot.parse() {
            Ok(slot) => (node, slot),
            Err(_) => (reference, 0),
        },
        None => (reference, 0),
    }
}

impl GraphFile {
    /// Builds the in-memory graph.
    pub fn into_graph(self) -> Result<ConvertGraph, GraphFileError> {
        let mut graph = ConvertGraph::new();
        let mut ids: HashMap<String, NodeId> = HashMap::new();

        for entry in self.nodes {
            let key = entry.key().to_string();
            if ids.contains_key(&key) {
                return Err(GraphFileError::DuplicateId { id: key });
            }
            let mut inputs = Vec::with_capacity(entry.inputs.len());
            for reference in &entry.inputs {
                let (node, slot) = parse_reference(reference);
                let id = ids.get(node).ok_or_else(|| GraphFileError::UnknownReference {
                    node: key.clone(),
                    reference: reference.clone(),
                })?;
                inputs.push(OutputRef::new(*id, slot));
            }

            let mut node = Node::new(entry.kind, entry.name).with_params(entry.params);
            if let Some(outputs) = entry.outputs {
                node = node.with_outputs(outputs);
            }
            let id = graph.add_node(node, &inputs)?;
            ids.insert(key, id);
        }

        for reference in &self.outputs {
            let (node, slot) = parse_reference(reference);
            let id = ids.get(node).ok_or_else(|| GraphFileError::UnknownOutput {
                reference: reference.clone(),
            })?;
            graph.add_output(OutputRef::new(*id, slot))?;
        }
        Ok(graph)
    }

    /// Writes `graph` out in topological order. Nodes keep their name as id
    /// unless an earlier node already claimed it, in which case they get the
    /// first free `name#k`.
    pub fn from_graph(graph: &ConvertGraph) -> Result<GraphFile, GraphFileError> {
        let mut keys: HashMap<NodeId, String> = HashMap::new();
        let mut issued: HashSet<String> = HashSet::new();
        let mut suffix: HashMap<String, usize> = HashMap::new();
        let mut nodes = Vec::with_capacity(graph.node_count());

        let reference = |keys: &HashMap<NodeId, String>, r: OutputRef| -> Result<String, GraphFileError> {
            let key = keys
                .get(&r.node)
                .ok_or(GraphFileError::Graph(CoreError::NodeNotFound { id: r.node }))?;
            // A key that itself contains ':' always carries its slot, so
            // that a trailing ":<digits>" in the name is not read as one.
            Ok(if r.slot == 0 && !key.contains(':') {
                key.clone()
            } else {
                format!("{}:{}", key, r.slot)
            })
        };

        for id in graph.topological_order()? {
            let node = graph
                .node(id)
                .ok_or(GraphFileError::Graph(CoreError::NodeNotFound { id }))?;

            let mut key = node.name.clone();
            if issued.contains(&key) {
                let next = suffix.entry(node.name.clone()).or_insert(1);
                loop {
                    *next += 1;
                    key = format!("{}#{}", node.name, next);
                    if !issued.contains(&key) {
                        break;
                    }
                }
            }
            issued.insert(key.clone());

            let inputs = graph
                .producers(id)?
                .into_iter()
                .map(|r| reference(&keys, r))
                .collect::<Result<Vec<_>, _>>()?;
            let default_slots = node.outputs.len() == 1 && node.outputs[0] == node.name;

            nodes.push(NodeEntry {
                id: (key != node.name).then(|| key.clone()),
                name: node.name.clone(),
                kind: node.kind.clone(),
                params: node.params.clone(),
                outputs: (!default_slots).then(|| node.outputs.clone()),
                inputs,
            });
            keys.insert(id, key);
        }

        let outputs = graph
            .outputs()
            .iter()
            .map(|r| reference(&keys, *r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GraphFile { nodes, outputs })
    }
}
