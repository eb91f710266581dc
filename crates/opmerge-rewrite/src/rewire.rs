//! Reference rewiring: swapping a node for its replacement subgraph.
//!
//! [`replace_node`] is the only way the merge pass mutates the graph. It runs
//! in two phases:
//!
//! 1. **Validate** the [`Replacement`] against the graph without touching it.
//!    Anything wrong here is the rule's fault and comes back as
//!    [`ReplaceError::Invalid`]; the graph is unchanged.
//! 2. **Commit**: allocate the planned nodes, move every consumer binding of
//!    the original from `(original, i)` to `(root, i)`, move root outputs the
//!    same way, retire the original, and optionally reclaim orphans. Once
//!    this phase starts it must finish; a failure is
//!    [`ReplaceError::Rewire`] and leaves the graph unusable.
//!
//! The original node is never modified. Its name and slot names are copied
//! onto the planned root before allocation, and the node is handed back to
//! the arena's free list untouched.

use smallvec::SmallVec;

use opmerge_core::{Consumer, ConvertGraph, CoreError, NodeId, OutputRef};

use crate::rule::{Input, Replacement};

/// Failure of [`replace_node`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplaceError {
    /// The replacement breaks the rewrite contract. Nothing was changed.
    #[error("invalid replacement: {reason}")]
    Invalid { reason: String },

    /// A graph operation failed after validation passed.
    #[error("rewiring failed: {0}")]
    Rewire(#[from] CoreError),
}

impl ReplaceError {
    fn invalid(reason: impl Into<String>) -> Self {
        ReplaceError::Invalid {
            reason: reason.into(),
        }
    }
}

/// What a committed replacement did to the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewired {
    /// The replacement root, now standing in for the original.
    pub replacement: NodeId,
    /// Every node allocated for the replacement, in planned order.
    pub allocated: Vec<NodeId>,
    /// Consumer bindings moved onto the replacement.
    pub rebound: usize,
    /// Snapshot entries that were no longer bound when visited.
    pub skipped: usize,
    /// Root outputs moved onto the replacement.
    pub outputs_moved: usize,
    /// The original first, then any orphans reclaimed after it.
    pub retired: Vec<NodeId>,
}

/// Replaces `original` with `replacement`, redirecting all of its consumers.
pub fn replace_node(
    graph: &mut ConvertGraph,
    original: NodeId,
    replacement: Replacement,
    reclaim_orphans: bool,
) -> Result<Rewired, ReplaceError> {
    validate(graph, original, &replacement)?;

    let source = graph
        .node(original)
        .ok_or(CoreError::NodeNotFound { id: original })?;
    let name = source.name.clone();
    let slot_names = source.outputs.clone();
    let (planned, root) = replacement.into_parts();

    // Allocate planned nodes in order; validation guarantees every planned
    // input refers to an earlier entry of `allocated`.
    let mut allocated: Vec<NodeId> = Vec::with_capacity(planned.len());
    for (index, mut plan) in planned.into_iter().enumerate() {
        if index == root {
            plan.node.name = name.clone();
            plan.node.outputs = slot_names.clone();
        }
        let inputs: SmallVec<[OutputRef; 4]> = plan
            .inputs
            .iter()
            .map(|input| match *input {
                Input::Existing(r) => r,
                Input::Planned { index, slot } => allocated[index].output(slot),
            })
            .collect();
        allocated.push(graph.add_node(plan.node, &inputs)?);
    }
    let root_id = allocated[root];

    let consumers = graph.consumers(original)?;
    let (rebound, skipped) = redirect_consumers(graph, &consumers, root_id)?;
    let outputs_moved = graph.redirect_outputs(original, root_id)?;

    let released = graph.producers(original)?;
    graph.retire(original)?;
    let mut retired = vec![original];

    if reclaim_orphans {
        let candidates = released
            .iter()
            .map(|r| r.node)
            .chain(allocated.iter().copied().filter(|&id| id != root_id));
        retired.extend(graph.reclaim_orphans(candidates));
    }

    #[cfg(debug_assertions)]
    graph.assert_consistency();

    tracing::debug!(
        node = %original,
        replacement = %root_id,
        rebound,
        skipped,
        outputs_moved,
        retired = retired.len(),
        "rewired consumers onto replacement"
    );

    Ok(Rewired {
        replacement: root_id,
        allocated,
        rebound,
        skipped,
        outputs_moved,
        retired,
    })
}

/// Moves each still-bound consumer in `snapshot` from its producer slot `i`
/// to slot `i` of `replacement`, keeping the consumer's port.
///
/// Entries whose consumer was retired or whose edge was already rebound are
/// skipped without being dereferenced. Returns `(rebound, skipped)`.
pub fn redirect_consumers(
    graph: &mut ConvertGraph,
    snapshot: &[Consumer],
    replacement: NodeId,
) -> Result<(usize, usize), CoreError> {
    let mut rebound = 0;
    let mut skipped = 0;
    for consumer in snapshot {
        if !graph.is_bound(consumer) {
            tracing::trace!(consumer = %consumer.node, port = consumer.port, "skipping stale consumer");
            skipped += 1;
            continue;
        }
        graph.rebind(consumer, replacement.output(consumer.producer.slot))?;
        rebound += 1;
    }
    Ok((rebound, skipped))
}

/// Checks a replacement against the contract without mutating the graph.
pub fn validate(
    graph: &ConvertGraph,
    original: NodeId,
    replacement: &Replacement,
) -> Result<(), ReplaceError> {
    let source = graph
        .node(original)
        .ok_or(CoreError::NodeNotFound { id: original })?;
    let planned = replacement.nodes();

    let root = replacement.root().ok_or_else(|| {
        ReplaceError::invalid(format!(
            "root index {} out of range ({} planned node(s))",
            replacement.root_index(),
            planned.len()
        ))
    })?;

    if root.node.slot_count() != source.slot_count() {
        return Err(ReplaceError::invalid(format!(
            "slot count mismatch: '{}' has {} output slot(s), replacement root '{}' has {}",
            source.name,
            source.slot_count(),
            root.node.name,
            root.node.slot_count()
        )));
    }

    for (index, plan) in planned.iter().enumerate() {
        for (port, input) in plan.inputs.iter().enumerate() {
            let at = || format!("planned node {} ('{}') input {}", index, plan.node.name, port);
            match *input {
                Input::Existing(r) => {
                    if let Err(err) = graph.check_output(r) {
                        return Err(ReplaceError::invalid(format!("{}: {}", at(), err)));
                    }
                    if r.node == original {
                        return Err(ReplaceError::invalid(format!(
                            "{} refers to the node being replaced",
                            at()
                        )));
                    }
                    if graph.reaches(original, r.node) {
                        return Err(ReplaceError::invalid(format!(
                            "{} consumes node {} which depends on the node being replaced",
                            at(),
                            r.node
                        )));
                    }
                }
                Input::Planned { index: target, slot } => {
                    if target >= index {
                        return Err(ReplaceError::invalid(format!(
                            "{} refers to planned node {}, which is not earlier in the replacement",
                            at(),
                            target
                        )));
                    }
                    let slots = planned[target].node.slot_count();
                    if usize::from(slot) >= slots {
                        return Err(ReplaceError::invalid(format!(
                            "{} refers to slot {} of planned node {} which has {} slot(s)",
                            at(),
                            slot,
                            target,
                            slots
                        )));
                    }
                }
            }
        }
    }

    Ok(())
}
