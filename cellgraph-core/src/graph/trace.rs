//! Trace Graph
//!
//! Records which cached values were read while computing which others. An
//! edge `A -> B` means A's value was read while B was being computed, so B
//! must be dropped whenever A is.
//!
//! The graph is kept acyclic along every path the executor can build: a node
//! cannot read itself because the live call stack rejects it before any edge
//! is recorded.

use std::collections::HashSet;

use indexmap::IndexSet;
use tracing::trace;

use super::digraph::DiGraph;
use super::node::{Node, NodeKind, ObjectId};

#[derive(Debug, Default, Clone)]
pub struct TraceGraph {
    graph: DiGraph<Node>,
}

impl TraceGraph {
    /// Create an empty trace graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if `node` is in the graph, i.e. holds a traced value.
    pub fn has_node(&self, node: &Node) -> bool {
        self.graph.contains(node)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.nodes()
    }

    /// Insert `node` without edges, as an outermost value.
    pub fn add_node(&mut self, node: Node) {
        self.graph.add_node(node);
    }

    /// Record that `src` was read while computing `dst`.
    pub fn add_edge(&mut self, src: Node, dst: Node) {
        trace!(%src, %dst, "trace edge");
        self.graph.add_edge(src, dst);
    }

    /// Check if `src` was read while computing `dst`.
    pub fn has_edge(&self, src: &Node, dst: &Node) -> bool {
        self.graph.has_edge(src, dst)
    }

    /// Values `node` read, in read order.
    pub fn predecessors(&self, node: &Node) -> impl Iterator<Item = &Node> {
        self.graph.predecessors(node)
    }

    /// Values that read `node`, in the order they were recorded.
    pub fn successors(&self, node: &Node) -> impl Iterator<Item = &Node> {
        self.graph.successors(node)
    }

    /// Everything computed from `node`, directly or transitively.
    pub fn descendants(&self, node: &Node) -> IndexSet<Node> {
        self.graph.descendants(node)
    }

    /// Remove `node` and everything computed from it.
    ///
    /// Returns the removed set, which is empty if `node` was absent.
    pub fn remove_with_descendants(&mut self, node: &Node) -> IndexSet<Node> {
        if !self.graph.contains(node) {
            return IndexSet::new();
        }
        let mut removed = self.graph.descendants(node);
        removed.insert(node.clone());
        self.remove_nodes(&removed);
        removed
    }

    /// Remove every node in `nodes`, then any object-only node left without
    /// dependents.
    ///
    /// Returns the object-only nodes pruned along the way.
    pub fn remove_nodes<'a, I>(&mut self, nodes: I) -> Vec<Node>
    where
        I: IntoIterator<Item = &'a Node>,
    {
        let mut orphan_candidates = Vec::new();
        for node in nodes {
            orphan_candidates.extend(
                self.graph
                    .predecessors(node)
                    .filter(|p| p.kind() == NodeKind::Object)
                    .cloned(),
            );
            self.graph.remove_node(node);
        }

        let mut pruned = Vec::new();
        for candidate in orphan_candidates {
            if self.graph.contains(&candidate) && self.graph.out_degree(&candidate) == 0 {
                self.graph.remove_node(&candidate);
                pruned.push(candidate);
            }
        }
        pruned
    }

    /// All nodes owned by `obj`. A linear scan.
    pub fn nodes_for_object(&self, obj: ObjectId) -> IndexSet<Node> {
        self.graph
            .nodes()
            .filter(|n| n.object() == Some(obj))
            .cloned()
            .collect()
    }

    /// Nodes reachable from `node` that have no successors of their own.
    pub fn descendants_with_zero_outdegree(&self, node: &Node) -> Vec<Node> {
        self.graph
            .descendants(node)
            .into_iter()
            .filter(|n| self.graph.out_degree(n) == 0)
            .collect()
    }

    /// Postorder over the closure of `start` in this graph extended with the
    /// dynamic children reported by `expand`.
    ///
    /// Every dependent of a node appears before the node itself. `visited` is
    /// shared across calls so that several starts yield one sequence.
    pub fn extended_postorder<F>(
        &self,
        start: &Node,
        visited: &mut HashSet<Node>,
        out: &mut Vec<Node>,
        expand: F,
    ) where
        F: FnMut(&Node) -> Vec<Node>,
    {
        self.graph.postorder_with(start, visited, out, expand);
    }

    pub(crate) fn inner(&self) -> &DiGraph<Node> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    fn obj(i: usize) -> ObjectId {
        ObjectId::from_index(i)
    }

    fn n(o: usize, k: i64) -> Node {
        Node::eval(obj(o), key![k])
    }

    #[test]
    fn remove_with_descendants_removes_dependents_only() {
        let mut g = TraceGraph::new();
        g.add_edge(n(0, 1), n(1, 1));
        g.add_edge(n(1, 1), n(2, 1));
        g.add_edge(n(3, 1), n(2, 1));

        let removed = g.remove_with_descendants(&n(1, 1));
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&n(1, 1)));
        assert!(removed.contains(&n(2, 1)));
        assert!(g.has_node(&n(0, 1)));
        assert!(g.has_node(&n(3, 1)));
    }

    #[test]
    fn remove_absent_node_is_noop() {
        let mut g = TraceGraph::new();
        g.add_node(n(0, 1));
        assert!(g.remove_with_descendants(&n(9, 9)).is_empty());
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn orphaned_object_nodes_are_pruned() {
        let mut g = TraceGraph::new();
        g.add_edge(Node::Object(obj(5)), n(1, 1));
        g.add_edge(n(0, 1), n(1, 1));

        let removed = g.remove_with_descendants(&n(0, 1));
        assert_eq!(removed.len(), 2);
        assert!(!g.has_node(&Node::Object(obj(5))));
        assert!(g.is_empty());
    }

    #[test]
    fn nodes_for_object_scans_all_keys() {
        let mut g = TraceGraph::new();
        g.add_edge(n(0, 1), n(1, 1));
        g.add_edge(n(0, 2), n(1, 2));
        g.add_edge(Node::Object(obj(0)), n(1, 2));

        let nodes = g.nodes_for_object(obj(0));
        assert_eq!(nodes.len(), 3);
        assert!(nodes.contains(&Node::Object(obj(0))));
    }

    #[test]
    fn leaves_reachable_from_node() {
        let mut g = TraceGraph::new();
        g.add_edge(n(0, 1), n(1, 1));
        g.add_edge(n(1, 1), n(2, 1));
        g.add_edge(n(0, 1), n(3, 1));

        let mut leaves = g.descendants_with_zero_outdegree(&n(0, 1));
        leaves.sort_by_key(|n| n.object());
        assert_eq!(leaves, vec![n(2, 1), n(3, 1)]);
    }
}
