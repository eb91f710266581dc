//! ConvertGraph: the node arena the merge pass rewrites.
//!
//! [`ConvertGraph`] owns every [`Node`] in a petgraph `StableGraph`. Edges
//! run producer -> consumer and carry a [`Binding`]; nothing else holds a
//! node. Two indexes fall out of the arena for free and are kept current by
//! every mutation:
//! - incoming edges of a node, ordered by port, are its producer list;
//! - outgoing edges of a node are its live consumer set.
//!
//! # Identity
//!
//! `StableGraph` hands vacated indices to later allocations. Each allocation
//! therefore stamps a fresh generation and [`NodeId`] carries it; an id whose
//! generation does not match the live occupant resolves to nothing. A retired
//! node can never be confused with whatever is allocated in its place.
//!
//! # Roots
//!
//! The graph's ordered output list is its root set. A node is reachable when
//! some output depends on it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::edge::Binding;
use crate::error::CoreError;
use crate::id::{EdgeId, NodeId, OutputRef};
use crate::node::Node;

/// Number of input ports a node can have; ports are `u16`.
pub const MAX_INPUTS: usize = u16::MAX as usize + 1;

/// Arena slot: the node plus the generation it was allocated under.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    generation: u32,
    node: Node,
}

/// One consumer binding of a producer, as seen at query time.
///
/// This is a snapshot. Later mutations may retire the consumer or rebind the
/// edge; [`ConvertGraph::is_bound`] tells whether it still holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumer {
    /// The edge carrying the binding.
    pub edge: EdgeId,
    /// The producer output being consumed.
    pub producer: OutputRef,
    /// The consuming node.
    pub node: NodeId,
    /// Input port of the consuming node.
    pub port: u16,
}

/// The conversion graph: node arena, data edges, and root outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvertGraph {
    arena: StableGraph<Entry, Binding, Directed, u32>,
    /// Root set, in declaration order.
    outputs: Vec<OutputRef>,
    /// Generation stamped on the next allocation.
    next_generation: u32,
}

impl ConvertGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        ConvertGraph::default()
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Returns the live id at an arena index, if any.
    fn id_at(&self, idx: NodeIndex<u32>) -> Option<NodeId> {
        self.arena
            .node_weight(idx)
            .map(|entry| NodeId::new(idx.index() as u32, entry.generation))
    }

    fn entry(&self, id: NodeId) -> Option<&Entry> {
        self.arena
            .node_weight(id.into())
            .filter(|entry| entry.generation == id.generation)
    }

    /// Returns `true` if `id` names a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    /// Looks up a live node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.entry(id).map(|entry| &entry.node)
    }

    fn live_node(&self, id: NodeId) -> Result<&Node, CoreError> {
        self.node(id).ok_or(CoreError::NodeNotFound { id })
    }

    /// Checks that `r` names an existing output slot of a live node.
    pub fn check_output(&self, r: OutputRef) -> Result<(), CoreError> {
        let node = self.live_node(r.node)?;
        if usize::from(r.slot) >= node.slot_count() {
            return Err(CoreError::SlotOutOfRange {
                node: r.node,
                slot: r.slot,
                slots: node.slot_count(),
            });
        }
        Ok(())
    }

    /// All live node ids in arena index order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.arena
            .node_indices()
            .filter_map(|idx| self.id_at(idx))
            .collect()
    }

    /// Iterates live nodes in arena index order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.arena.node_indices().filter_map(move |idx| {
            let entry = self.arena.node_weight(idx)?;
            Some((NodeId::new(idx.index() as u32, entry.generation), &entry.node))
        })
    }

    /// Finds the first live node (arena order) with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
    }

    pub fn node_count(&self) -> usize {
        self.arena.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.arena.edge_count()
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Allocates a node whose input port `i` is bound to `inputs[i]`.
    ///
    /// Every input must name an existing slot of a live node. Because inputs
    /// can only point at nodes that already exist, construction through this
    /// method cannot introduce a cycle.
    pub fn add_node(&mut self, node: Node, inputs: &[OutputRef]) -> Result<NodeId, CoreError> {
        if inputs.len() > MAX_INPUTS {
            return Err(CoreError::TooManyInputs {
                count: inputs.len(),
                max: MAX_INPUTS,
            });
        }
        for &input in inputs {
            self.check_output(input)?;
        }

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let idx = self.arena.add_node(Entry { generation, node });

        for (port, input) in (0..=u16::MAX).zip(inputs) {
            self.arena
                .add_edge(input.node.into(), idx, Binding::new(input.slot, port));
        }

        Ok(NodeId::new(idx.index() as u32, generation))
    }

    /// Appends `r` to the graph's root outputs.
    pub fn add_output(&mut self, r: OutputRef) -> Result<(), CoreError> {
        self.check_output(r)?;
        self.outputs.push(r);
        Ok(())
    }

    /// The root outputs, in declaration order.
    pub fn outputs(&self) -> &[OutputRef] {
        &self.outputs
    }

    /// Returns `true` if some root output refers to `id`.
    pub fn is_root(&self, id: NodeId) -> bool {
        self.outputs.iter().any(|r| r.node == id)
    }

    // -----------------------------------------------------------------------
    // Producer / consumer index
    // -----------------------------------------------------------------------

    /// The ordered producer list of `id` (input port order).
    pub fn producers(&self, id: NodeId) -> Result<SmallVec<[OutputRef; 4]>, CoreError> {
        self.live_node(id)?;
        let mut bound: SmallVec<[(u16, OutputRef); 4]> = SmallVec::new();
        for edge in self.arena.edges_directed(id.into(), Direction::Incoming) {
            let source = self
                .id_at(edge.source())
                .ok_or(CoreError::EdgeNotFound { edge: edge.id().into() })?;
            let binding = edge.weight();
            bound.push((binding.port, source.output(binding.slot)));
        }
        bound.sort_by_key(|(port, _)| *port);
        Ok(bound.into_iter().map(|(_, r)| r).collect())
    }

    /// The producer bound to input `port` of `id`, if any.
    pub fn producer(&self, id: NodeId, port: u16) -> Option<OutputRef> {
        if !self.contains(id) {
            return None;
        }
        self.arena
            .edges_directed(id.into(), Direction::Incoming)
            .find(|edge| edge.weight().port == port)
            .and_then(|edge| {
                self.id_at(edge.source())
                    .map(|source| source.output(edge.weight().slot))
            })
    }

    /// Snapshot of every consumer binding of `id`, ordered by consumer index
    /// then port.
    pub fn consumers(&self, id: NodeId) -> Result<Vec<Consumer>, CoreError> {
        self.live_node(id)?;
        let mut consumers = Vec::new();
        for edge in self.arena.edges_directed(id.into(), Direction::Outgoing) {
            let target = self
                .id_at(edge.target())
                .ok_or(CoreError::EdgeNotFound { edge: edge.id().into() })?;
            let binding = edge.weight();
            consumers.push(Consumer {
                edge: edge.id().into(),
                producer: id.output(binding.slot),
                node: target,
                port: binding.port,
            });
        }
        consumers.sort_by_key(|c| (c.node.index, c.port));
        Ok(consumers)
    }

    /// Number of consumer bindings of `id` (0 for dead ids).
    pub fn consumer_count(&self, id: NodeId) -> usize {
        if !self.contains(id) {
            return 0;
        }
        self.arena
            .edges_directed(id.into(), Direction::Outgoing)
            .count()
    }

    // -----------------------------------------------------------------------
    // Mutation primitives used by rewiring
    // -----------------------------------------------------------------------

    /// Returns `true` if the snapshot `consumer` still describes a live edge:
    /// both endpoints alive and the edge still binds the same slot and port.
    pub fn is_bound(&self, consumer: &Consumer) -> bool {
        if !self.contains(consumer.producer.node) || !self.contains(consumer.node) {
            return false;
        }
        let idx: EdgeIndex<u32> = consumer.edge.into();
        match (self.arena.edge_endpoints(idx), self.arena.edge_weight(idx)) {
            (Some((source, target)), Some(binding)) => {
                source == consumer.producer.node.into()
                    && target == consumer.node.into()
                    && binding.slot == consumer.producer.slot
                    && binding.port == consumer.port
            }
            _ => false,
        }
    }

    /// Moves the binding described by `consumer` onto producer output `to`,
    /// keeping the consumer's input port.
    pub fn rebind(&mut self, consumer: &Consumer, to: OutputRef) -> Result<EdgeId, CoreError> {
        if !self.is_bound(consumer) {
            return Err(CoreError::EdgeNotFound { edge: consumer.edge });
        }
        self.check_output(to)?;
        self.arena.remove_edge(consumer.edge.into());
        let idx = self.arena.add_edge(
            to.node.into(),
            consumer.node.into(),
            Binding::new(to.slot, consumer.port),
        );
        Ok(idx.into())
    }

    /// Re-points every root output on `from` to the same slot of `to`.
    ///
    /// Returns how many outputs moved.
    pub fn redirect_outputs(&mut self, from: NodeId, to: NodeId) -> Result<usize, CoreError> {
        let slots = self.live_node(to)?.slot_count();
        let mut moved = 0;
        for r in self.outputs.iter().filter(|r| r.node == from) {
            if usize::from(r.slot) >= slots {
                return Err(CoreError::SlotOutOfRange {
                    node: to,
                    slot: r.slot,
                    slots,
                });
            }
        }
        for r in self.outputs.iter_mut().filter(|r| r.node == from) {
            r.node = to;
            moved += 1;
        }
        Ok(moved)
    }

    /// Removes a node that nothing refers to any more.
    ///
    /// Its own producer bindings go with it. Fails if a consumer edge or a
    /// root output still names the node; the node is handed back untouched
    /// otherwise.
    pub fn retire(&mut self, id: NodeId) -> Result<Node, CoreError> {
        self.live_node(id)?;
        let consumers = self.consumer_count(id);
        if consumers > 0 || self.is_root(id) {
            return Err(CoreError::StillReferenced { id, consumers });
        }
        self.arena
            .remove_node(id.into())
            .map(|entry| entry.node)
            .ok_or(CoreError::NodeNotFound { id })
    }

    /// Retires every candidate left with no consumers and no root output,
    /// then repeats for the producers those retirements released.
    ///
    /// Returns the retired ids in retirement order.
    pub fn reclaim_orphans<I>(&mut self, candidates: I) -> Vec<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut worklist: Vec<NodeId> = candidates.into_iter().collect();
        worklist.reverse();
        let mut retired = Vec::new();

        while let Some(id) = worklist.pop() {
            if !self.contains(id) || self.consumer_count(id) > 0 || self.is_root(id) {
                continue;
            }
            let released: SmallVec<[OutputRef; 4]> = self.producers(id).unwrap_or_default();
            if self.retire(id).is_ok() {
                retired.push(id);
                for r in released.iter().rev() {
                    worklist.push(r.node);
                }
            }
        }
        retired
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// Live nodes in topological order (producers first).
    ///
    /// Kahn's algorithm; among ready nodes the lowest arena index goes first,
    /// so the order is a pure function of the graph's contents.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, CoreError> {
        let mut in_degree: HashMap<NodeIndex<u32>, usize> = HashMap::new();
        let mut ready: BinaryHeap<Reverse<NodeIndex<u32>>> = BinaryHeap::new();

        for idx in self.arena.node_indices() {
            let degree = self
                .arena
                .edges_directed(idx, Direction::Incoming)
                .count();
            in_degree.insert(idx, degree);
            if degree == 0 {
                ready.push(Reverse(idx));
            }
        }

        let mut sorted = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(idx)) = ready.pop() {
            if let Some(id) = self.id_at(idx) {
                sorted.push(id);
            }
            for edge in self.arena.edges_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&edge.target()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(edge.target()));
                    }
                }
            }
        }

        // Nodes on a cycle never reach in-degree zero.
        let stuck = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(idx, _)| *idx)
            .min()
            .and_then(|idx| self.id_at(idx));
        if let Some(node) = stuck {
            return Err(CoreError::Cycle { node });
        }

        Ok(sorted)
    }

    /// Returns `true` if data flows from `from` to `to` along one or more
    /// edges (or `from == to`).
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        if !self.contains(from) || !self.contains(to) {
            return false;
        }
        petgraph::algo::has_path_connecting(&self.arena, from.into(), to.into(), None)
    }

    /// Every live node some root output depends on.
    pub fn reachable(&self) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeId> = self
            .outputs
            .iter()
            .map(|r| r.node)
            .filter(|id| self.contains(*id))
            .collect();

        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for edge in self.arena.edges_directed(id.into(), Direction::Incoming) {
                if let Some(source) = self.id_at(edge.source()) {
                    stack.push(source);
                }
            }
        }
        seen
    }

    // -----------------------------------------------------------------------
    // Constant helpers for rules
    // -----------------------------------------------------------------------

    /// Returns `true` if `r` is produced by a constant node.
    pub fn is_constant(&self, r: OutputRef) -> bool {
        self.node(r.node).map_or(false, |n| n.kind.is_constant())
    }

    /// The params of the constant node producing `r`, if it is one.
    pub fn constant_value(&self, r: OutputRef) -> Option<&serde_json::Value> {
        self.node(r.node)
            .filter(|n| n.kind.is_constant())
            .map(|n| &n.params)
    }

    // -----------------------------------------------------------------------
    // Debug consistency assertion
    // -----------------------------------------------------------------------

    /// Verifies that every edge binds an existing slot and every root output
    /// names a live slot. Panics with a description otherwise.
    pub fn assert_consistency(&self) {
        for edge in self.arena.edge_indices() {
            let (source, target) = self
                .arena
                .edge_endpoints(edge)
                .expect("edge index from edge_indices has endpoints");
            let source_node = &self.arena[source].node;
            let binding = self.arena[edge];
            assert!(
                usize::from(binding.slot) < source_node.slot_count(),
                "edge {:?} binds slot {} of '{}' which has {} slot(s)",
                edge,
                binding.slot,
                source_node.name,
                source_node.slot_count()
            );
            assert!(
                self.arena.node_weight(target).is_some(),
                "edge {:?} targets a vacant index",
                edge
            );
        }
        for r in &self.outputs {
            assert!(
                self.check_output(*r).is_ok(),
                "graph output {} does not name a live slot",
                r
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> (ConvertGraph, NodeId, NodeId, NodeId) {
        let mut g = ConvertGraph::new();
        let x = g.add_node(Node::new("Input", "x"), &[]).unwrap();
        let relu = g.add_node(Node::new("Relu", "relu"), &[x.into()]).unwrap();
        let out = g.add_node(Node::new("Identity", "out"), &[relu.into()]).unwrap();
        g.add_output(out.into()).unwrap();
        (g, x, relu, out)
    }

    #[test]
    fn add_node_binds_ports_in_order() {
        let mut g = ConvertGraph::new();
        let a = g.add_node(Node::new("Input", "a"), &[]).unwrap();
        let b = g.add_node(Node::new("Input", "b"), &[]).unwrap();
        let sub = g.add_node(Node::new("Sub", "sub"), &[b.into(), a.into()]).unwrap();

        let producers = g.producers(sub).unwrap();
        assert_eq!(producers.as_slice(), &[b.output(0), a.output(0)]);
        assert_eq!(g.producer(sub, 1), Some(a.output(0)));
        assert_eq!(g.producer(sub, 2), None);
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn add_node_rejects_dead_or_out_of_range_inputs() {
        let mut g = ConvertGraph::new();
        let a = g.add_node(Node::new("Input", "a"), &[]).unwrap();

        let err = g.add_node(Node::new("Relu", "r"), &[a.output(1)]).unwrap_err();
        assert_eq!(
            err,
            CoreError::SlotOutOfRange {
                node: a,
                slot: 1,
                slots: 1
            }
        );

        let ghost = NodeId::new(99, 0);
        let err = g.add_node(Node::new("Relu", "r"), &[ghost.into()]).unwrap_err();
        assert_eq!(err, CoreError::NodeNotFound { id: ghost });
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn add_node_rejects_more_inputs_than_ports() {
        let mut g = ConvertGraph::new();
        let a = g.add_node(Node::new("Input", "a"), &[]).unwrap();

        let inputs = vec![a.output(0); MAX_INPUTS + 1];
        let err = g.add_node(Node::new("Concat", "wide"), &inputs).unwrap_err();
        assert_eq!(
            err,
            CoreError::TooManyInputs {
                count: MAX_INPUTS + 1,
                max: MAX_INPUTS
            }
        );
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn add_node_binds_the_last_addressable_port() {
        let mut g = ConvertGraph::new();
        let a = g.add_node(Node::new("Input", "a"), &[]).unwrap();
        let b = g.add_node(Node::new("Input", "b"), &[]).unwrap();

        let mut inputs = vec![a.output(0); MAX_INPUTS];
        inputs[MAX_INPUTS - 1] = b.output(0);
        let wide = g.add_node(Node::new("Concat", "wide"), &inputs).unwrap();
        assert_eq!(g.producer(wide, u16::MAX), Some(b.output(0)));
        assert_eq!(g.consumer_count(b), 1);
        assert_eq!(g.edge_count(), MAX_INPUTS);
    }

    #[test]
    fn cycle_error_names_a_live_node_on_the_cycle() {
        let mut g = ConvertGraph::new();
        let c = g.add_node(Node::new("Input", "c"), &[]).unwrap();
        let a = g.add_node(Node::new("Relu", "a"), &[c.into()]).unwrap();
        let b = g.add_node(Node::new("Relu", "b"), &[a.into()]).unwrap();
        let edge = g.consumers(c).unwrap()[0];
        g.rebind(&edge, b.into()).unwrap();

        let err = g.topological_order().unwrap_err();
        assert_eq!(err, CoreError::Cycle { node: a });
        assert!(g.contains(a));
    }

    #[test]
    fn consumers_reflect_every_binding() {
        let mut g = ConvertGraph::new();
        let split = g
            .add_node(Node::new("Split", "split").with_outputs(["s0", "s1"]), &[])
            .unwrap();
        let add = g
            .add_node(Node::new("Add", "add"), &[split.output(1), split.output(0)])
            .unwrap();
        let neg = g.add_node(Node::new("Neg", "neg"), &[split.output(1)]).unwrap();

        let consumers = g.consumers(split).unwrap();
        assert_eq!(consumers.len(), 3);
        assert_eq!((consumers[0].node, consumers[0].port), (add, 0));
        assert_eq!(consumers[0].producer, split.output(1));
        assert_eq!((consumers[1].node, consumers[1].port), (add, 1));
        assert_eq!(consumers[1].producer, split.output(0));
        assert_eq!((consumers[2].node, consumers[2].port), (neg, 0));
        assert_eq!(g.consumer_count(split), 3);
    }

    #[test]
    fn rebind_moves_edge_and_keeps_port() {
        let (mut g, x, relu, out) = chain();
        let y = g.add_node(Node::new("Input", "y"), &[]).unwrap();

        let consumer = g.consumers(relu).unwrap()[0];
        g.rebind(&consumer, y.into()).unwrap();

        assert_eq!(g.producer(out, 0), Some(y.output(0)));
        assert_eq!(g.consumer_count(relu), 0);
        assert!(!g.is_bound(&consumer));
        assert_eq!(g.consumer_count(x), 1);
    }

    #[test]
    fn rebind_stale_snapshot_fails() {
        let (mut g, _x, relu, _out) = chain();
        let y = g.add_node(Node::new("Input", "y"), &[]).unwrap();
        let z = g.add_node(Node::new("Input", "z"), &[]).unwrap();

        let consumer = g.consumers(relu).unwrap()[0];
        g.rebind(&consumer, y.into()).unwrap();
        let err = g.rebind(&consumer, z.into()).unwrap_err();
        assert_eq!(err, CoreError::EdgeNotFound { edge: consumer.edge });
    }

    #[test]
    fn retire_refuses_referenced_nodes() {
        let (mut g, _x, relu, out) = chain();
        assert_eq!(
            g.retire(relu).unwrap_err(),
            CoreError::StillReferenced { id: relu, consumers: 1 }
        );
        assert_eq!(
            g.retire(out).unwrap_err(),
            CoreError::StillReferenced { id: out, consumers: 0 }
        );
    }

    #[test]
    fn retired_index_reuse_gets_new_identity() {
        let mut g = ConvertGraph::new();
        let a = g.add_node(Node::new("Input", "a"), &[]).unwrap();
        let retired = g.retire(a).unwrap();
        assert_eq!(retired.name, "a");

        let b = g.add_node(Node::new("Input", "b"), &[]).unwrap();
        assert_eq!(a.index, b.index);
        assert_ne!(a, b);
        assert!(!g.contains(a));
        assert!(g.node(a).is_none());
        assert_eq!(g.node(b).unwrap().name, "b");
    }

    #[test]
    fn redirect_outputs_moves_roots() {
        let (mut g, _x, relu, out) = chain();
        let moved = g.redirect_outputs(out, relu).unwrap();
        assert_eq!(moved, 1);
        assert_eq!(g.outputs(), &[relu.output(0)]);
        assert!(g.is_root(relu));
        assert!(!g.is_root(out));
    }

    #[test]
    fn redirect_outputs_checks_slot_range_first() {
        let mut g = ConvertGraph::new();
        let split = g
            .add_node(Node::new("Split", "split").with_outputs(["a", "b"]), &[])
            .unwrap();
        let one = g.add_node(Node::new("Input", "one"), &[]).unwrap();
        g.add_output(split.output(0)).unwrap();
        g.add_output(split.output(1)).unwrap();

        assert!(g.redirect_outputs(split, one).is_err());
        assert_eq!(g.outputs(), &[split.output(0), split.output(1)]);
    }

    #[test]
    fn reclaim_orphans_cascades_through_producers() {
        let (mut g, x, relu, out) = chain();
        let y = g.add_node(Node::new("Input", "y"), &[]).unwrap();
        let consumer = g.consumers(relu).unwrap()[0];
        g.rebind(&consumer, y.into()).unwrap();

        let retired = g.reclaim_orphans([relu]);
        assert_eq!(retired, vec![relu, x]);
        assert!(g.contains(out));
        assert!(g.contains(y));
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn reclaim_orphans_keeps_shared_and_root_nodes() {
        let mut g = ConvertGraph::new();
        let x = g.add_node(Node::new("Input", "x"), &[]).unwrap();
        let a = g.add_node(Node::new("Neg", "a"), &[x.into()]).unwrap();
        let b = g.add_node(Node::new("Abs", "b"), &[x.into()]).unwrap();
        g.add_output(b.into()).unwrap();

        let retired = g.reclaim_orphans([a, b]);
        assert_eq!(retired, vec![a]);
        assert!(g.contains(x));
        assert!(g.contains(b));
    }

    #[test]
    fn topological_order_is_producers_first_and_index_stable() {
        let mut g = ConvertGraph::new();
        let c = g.add_node(Node::new("Input", "c"), &[]).unwrap();
        let a = g.add_node(Node::new("Input", "a"), &[]).unwrap();
        let sum = g.add_node(Node::new("Add", "sum"), &[a.into(), c.into()]).unwrap();
        let neg = g.add_node(Node::new("Neg", "neg"), &[a.into()]).unwrap();

        let order = g.topological_order().unwrap();
        assert_eq!(order, vec![c, a, sum, neg]);
        assert_eq!(order, g.topological_order().unwrap());
    }

    #[test]
    fn reaches_follows_data_flow_direction() {
        let (g, x, relu, out) = chain();
        assert!(g.reaches(x, out));
        assert!(g.reaches(relu, relu));
        assert!(!g.reaches(out, x));
    }

    #[test]
    fn reachable_from_outputs_only() {
        let (mut g, x, relu, out) = chain();
        let dangling = g.add_node(Node::new("Neg", "dangling"), &[x.into()]).unwrap();

        let live = g.reachable();
        assert!(live.contains(&x) && live.contains(&relu) && live.contains(&out));
        assert!(!live.contains(&dangling));
    }

    #[test]
    fn constant_helpers() {
        let mut g = ConvertGraph::new();
        let k = g.add_node(Node::constant("k", json!(3)), &[]).unwrap();
        let x = g.add_node(Node::new("Input", "x"), &[]).unwrap();

        assert!(g.is_constant(k.into()));
        assert!(!g.is_constant(x.into()));
        assert_eq!(g.constant_value(k.into()), Some(&json!(3)));
        assert_eq!(g.constant_value(x.into()), None);
    }

    #[test]
    fn find_by_name_returns_first_match() {
        let (g, _x, relu, _out) = chain();
        assert_eq!(g.find_by_name("relu"), Some(relu));
        assert_eq!(g.find_by_name("missing"), None);
    }

    #[test]
    fn serde_roundtrip_preserves_identity_and_edges() {
        let (mut g, x, relu, out) = chain();
        let gone = g.add_node(Node::new("Input", "gone"), &[]).unwrap();
        g.retire(gone).unwrap();

        let json = serde_json::to_string(&g).unwrap();
        let back: ConvertGraph = serde_json::from_str(&json).unwrap();

        assert_eq!(back.node_count(), 3);
        assert_eq!(back.edge_count(), 2);
        assert_eq!(back.outputs(), &[out.output(0)]);
        assert_eq!(back.producers(relu).unwrap().as_slice(), &[x.output(0)]);
        back.assert_consistency();

        // Generations keep counting after a reload.
        let mut back = back;
        let fresh = back.add_node(Node::new("Input", "fresh"), &[]).unwrap();
        assert!(fresh.generation > out.generation);
    }
}

#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;
    use proptest::sample::Index;

    /// Node `i` reads up to three earlier nodes.
    fn build(picks: &[Vec<Index>]) -> (ConvertGraph, Vec<NodeId>) {
        let mut g = ConvertGraph::new();
        let mut ids: Vec<NodeId> = Vec::new();
        for (i, inputs) in picks.iter().enumerate() {
            let inputs: Vec<OutputRef> = if i == 0 {
                Vec::new()
            } else {
                inputs.iter().map(|p| ids[p.index(i)].into()).collect()
            };
            ids.push(g.add_node(Node::new("Op", format!("n{i}")), &inputs).unwrap());
        }
        (g, ids)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn topological_order_puts_producers_first(
            picks in prop::collection::vec(prop::collection::vec(any::<Index>(), 0..4), 1..32)
        ) {
            let (g, ids) = build(&picks);
            let order = g.topological_order().unwrap();
            prop_assert_eq!(order.len(), ids.len());

            let position: HashMap<NodeId, usize> =
                order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
            for id in &ids {
                for p in g.producers(*id).unwrap() {
                    prop_assert!(position[&p.node] < position[id]);
                }
            }
        }

        #[test]
        fn consumer_index_mirrors_producer_lists(
            picks in prop::collection::vec(prop::collection::vec(any::<Index>(), 0..4), 1..32)
        ) {
            let (g, ids) = build(&picks);
            let mut forward = 0;
            for id in &ids {
                for (port, p) in g.producers(*id).unwrap().into_iter().enumerate() {
                    let back = g.consumers(p.node).unwrap();
                    prop_assert!(back
                        .iter()
                        .any(|c| c.node == *id && usize::from(c.port) == port && c.producer == p));
                    forward += 1;
                }
            }
            let backward: usize = ids.iter().map(|id| g.consumer_count(*id)).sum();
            prop_assert_eq!(forward, backward);
            prop_assert_eq!(backward, g.edge_count());
        }
    }
}
