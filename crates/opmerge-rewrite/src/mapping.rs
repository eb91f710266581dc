//! Data-driven one-to-one kind mappings.
//!
//! Most foreign operators convert to exactly one canonical operator with the
//! same inputs and parameters. Those cases are described as data (a
//! [`KindMapping`] table, loaded from JSON by the CLI) rather than written as
//! one rule type each.

use serde::{Deserialize, Serialize};

use opmerge_core::{ConvertGraph, Node, NodeId, NodeKind};

use crate::registry::RuleRegistry;
use crate::rule::{Replacement, RewriteError, Rule};

/// One row of a mapping table: nodes of kind `from` become kind `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindMapping {
    pub from: NodeKind,
    pub to: NodeKind,
    /// Input ports that must be fed by a constant before the node converts.
    #[serde(default)]
    pub require_const_inputs: Vec<u16>,
}

/// Rule applying a single [`KindMapping`].
#[derive(Debug, Clone)]
pub struct KindMapRule {
    name: String,
    mapping: KindMapping,
}

impl KindMapRule {
    pub fn new(mapping: KindMapping) -> Self {
        KindMapRule {
            name: format!("{} -> {}", mapping.from, mapping.to),
            mapping,
        }
    }

    pub fn mapping(&self) -> &KindMapping {
        &self.mapping
    }
}

impl Rule for KindMapRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, graph: &ConvertGraph, node: NodeId) -> bool {
        graph
            .node(node)
            .map_or(false, |n| n.kind == self.mapping.from)
    }

    fn rewrite(&self, graph: &ConvertGraph, node: NodeId) -> Result<Replacement, RewriteError> {
        let original = graph
            .node(node)
            .ok_or_else(|| RewriteError::invariant(format!("node {} is not live", node)))?;
        let producers = graph
            .producers(node)
            .map_err(|e| RewriteError::invariant(e.to_string()))?;

        for &port in &self.mapping.require_const_inputs {
            match producers.get(usize::from(port)) {
                Some(&input) if graph.is_constant(input) => {}
                Some(_) => {
                    return Err(RewriteError::declined(format!(
                        "input {} is not const",
                        port
                    )))
                }
                None => {
                    return Err(RewriteError::declined(format!(
                        "input {} is not connected",
                        port
                    )))
                }
            }
        }

        let converted = Node::new(self.mapping.to.clone(), original.name.clone())
            .with_params(original.params.clone())
            .with_outputs(original.outputs.iter().cloned());
        Ok(Replacement::single(converted, producers))
    }
}

/// Registers one [`KindMapRule`] per mapping under `package`, in table order.
pub fn register_mappings<I>(registry: &RuleRegistry, package: &str, mappings: I) -> usize
where
    I: IntoIterator<Item = KindMapping>,
{
    let mut count = 0;
    for mapping in mappings {
        registry.register(package, KindMapRule::new(mapping));
        count += 1;
    }
    count
}
