//! Dispatch for foreign ("Extra") operators.
//!
//! A source framework importer emits every operator it cannot map directly as
//! an `Extra:<engine>:<op_type>` node. Converters for those operators are
//! written per op type. [`ExtraManager`] collects them for one engine, and
//! [`ExtraRule`] is the single merge rule that matches any Extra node of that
//! engine with a registered converter and hands it over.

use std::sync::Arc;

use indexmap::IndexMap;

use opmerge_core::{ConvertGraph, NodeId};

use crate::registry::RuleRegistry;
use crate::rule::{Replacement, RewriteError, Rule};

/// Engine name used by the TensorFlow importer.
pub const TENSORFLOW: &str = "Tensorflow";

/// Package name the TensorFlow Extra rule is conventionally registered under.
pub const TF_EXTRA_PACKAGE: &str = "TFExtra";

/// Converter for one foreign op type.
pub trait ExtraTransform: Send + Sync {
    /// Builds the canonical replacement for `node`. Decline when an input the
    /// conversion needs (typically a constant) is not available yet.
    fn transform(&self, graph: &ConvertGraph, node: NodeId) -> Result<Replacement, RewriteError>;
}

/// Per-engine table of op type -> converter.
pub struct ExtraManager {
    engine: String,
    transforms: IndexMap<String, Arc<dyn ExtraTransform>>,
}

impl ExtraManager {
    pub fn new(engine: impl Into<String>) -> Self {
        ExtraManager {
            engine: engine.into(),
            transforms: IndexMap::new(),
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Adds a converter for `op_type`. The first converter for a type wins;
    /// returns `false` if one was already present.
    pub fn insert<T>(&mut self, op_type: impl Into<String>, transform: T) -> bool
    where
        T: ExtraTransform + 'static,
    {
        let op_type = op_type.into();
        if self.transforms.contains_key(&op_type) {
            tracing::warn!(engine = %self.engine, op_type = %op_type, "duplicate Extra converter ignored");
            return false;
        }
        self.transforms.insert(op_type, Arc::new(transform));
        true
    }

    pub fn find(&self, op_type: &str) -> Option<&Arc<dyn ExtraTransform>> {
        self.transforms.get(op_type)
    }

    /// Registered op types in insertion order.
    pub fn op_types(&self) -> impl Iterator<Item = &str> + '_ {
        self.transforms.keys().map(String::as_str)
    }

    /// Seals the table into a merge rule.
    pub fn into_rule(self) -> ExtraRule {
        ExtraRule {
            name: format!("ExtraManager:{}", self.engine),
            manager: self,
        }
    }

    /// Seals the table and registers the resulting rule under `package`.
    pub fn install(self, registry: &RuleRegistry, package: &str) {
        registry.register(package, self.into_rule());
    }
}

/// Merge rule dispatching Extra nodes of one engine to their converters.
pub struct ExtraRule {
    name: String,
    manager: ExtraManager,
}

impl ExtraRule {
    pub fn manager(&self) -> &ExtraManager {
        &self.manager
    }

    /// The converter for `node`, if it is an Extra node of this engine.
    fn converter<'a>(
        &'a self,
        graph: &'a ConvertGraph,
        node: NodeId,
    ) -> Option<(&'a str, &'a Arc<dyn ExtraTransform>)> {
        let (engine, op_type) = graph.node(node)?.kind.as_extra()?;
        if engine != self.manager.engine {
            return None;
        }
        self.manager.find(op_type).map(|t| (op_type, t))
    }
}

impl Rule for ExtraRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, graph: &ConvertGraph, node: NodeId) -> bool {
        self.converter(graph, node).is_some()
    }

    fn rewrite(&self, graph: &ConvertGraph, node: NodeId) -> Result<Replacement, RewriteError> {
        let (op_type, transform) = self.converter(graph, node).ok_or_else(|| {
            RewriteError::invariant(format!(
                "node {} is not a convertible {} Extra op",
                node, self.manager.engine
            ))
        })?;
        transform.transform(graph, node).map_err(|err| match err {
            RewriteError::Declined { reason } => RewriteError::declined(format!(
                "convert {} op type {} failed, may be some node is not const: {}",
                self.manager.engine, op_type, reason
            )),
            other => other,
        })
    }
}
