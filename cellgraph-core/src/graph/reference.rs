//! Reference Graph
//!
//! Tracks which computed nodes read which named external values. An edge
//! `ref -> node` means the computation of `node` read the current value of
//! `ref`. Reference nodes exist only while at least one reader does.

use std::collections::HashSet;

use tracing::trace;

use super::digraph::DiGraph;
use super::node::{Node, RefId};

#[derive(Debug, Default, Clone)]
pub struct ReferenceGraph {
    graph: DiGraph<Node>,
}

impl ReferenceGraph {
    /// Create an empty reference graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if `node` is tracked, as a reference or a reader.
    pub fn has_node(&self, node: &Node) -> bool {
        self.graph.contains(node)
    }

    /// Number of nodes, references and readers together.
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Number of reference nodes currently tracked.
    pub fn reference_count(&self) -> usize {
        self.graph
            .nodes()
            .filter(|n| matches!(n, Node::Reference(_)))
            .count()
    }

    /// Record that `reader` read `reference` while being computed.
    pub fn add_edge(&mut self, reference: RefId, reader: Node) {
        trace!(%reference, %reader, "reference edge");
        self.graph.add_edge(Node::Reference(reference), reader);
    }

    /// References read by `node`, in the order they were first read.
    pub fn references_of(&self, node: &Node) -> impl Iterator<Item = RefId> + '_ {
        self.graph.predecessors(node).filter_map(|p| match p {
            Node::Reference(r) => Some(*r),
            _ => None,
        })
    }

    /// Readers of `reference`, in the order they were recorded.
    pub fn readers_of(&self, reference: RefId) -> Vec<Node> {
        self.graph
            .successors(&Node::Reference(reference))
            .cloned()
            .collect()
    }

    /// Remove `reference` and everything downstream of it.
    ///
    /// Returns the downstream nodes in postorder. `reference` itself is
    /// removed but not returned. Other references left without readers are
    /// pruned.
    pub fn remove_with_descendants(&mut self, reference: RefId) -> Vec<Node> {
        let start = Node::Reference(reference);
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.graph
            .postorder_with(&start, &mut visited, &mut order, |_| Vec::new());

        let mut feeders = Vec::new();
        for node in &order {
            feeders.extend(
                self.graph
                    .predecessors(node)
                    .filter(|p| matches!(p, Node::Reference(_)))
                    .cloned(),
            );
            self.graph.remove_node(node);
        }
        for feeder in feeders {
            if self.graph.contains(&feeder) && self.graph.out_degree(&feeder) == 0 {
                self.graph.remove_node(&feeder);
            }
        }

        order.retain(|n| *n != start);
        order
    }

    /// Delete `node`, then every reference that fed it and has no readers
    /// left.
    pub fn remove_and_prune_referrers(&mut self, node: &Node) {
        if !self.graph.contains(node) {
            return;
        }
        let preds: Vec<Node> = self.graph.predecessors(node).cloned().collect();
        self.graph.remove_node(node);

        for pred in preds {
            if self.graph.out_degree(&pred) == 0 {
                self.graph.remove_node(&pred);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::ObjectId;
    use crate::key;

    fn r(i: usize) -> RefId {
        RefId::from_index(i)
    }

    fn n(o: usize, k: i64) -> Node {
        Node::eval(ObjectId::from_index(o), key![k])
    }

    #[test]
    fn references_keep_read_order() {
        let mut g = ReferenceGraph::new();
        g.add_edge(r(0), n(0, 3));
        g.add_edge(r(2), n(0, 3));
        g.add_edge(r(1), n(0, 3));
        let refs: Vec<_> = g.references_of(&n(0, 3)).collect();
        assert_eq!(refs, vec![r(0), r(2), r(1)]);
    }

    #[test]
    fn remove_with_descendants_excludes_reference() {
        let mut g = ReferenceGraph::new();
        g.add_edge(r(0), n(0, 1));
        g.add_edge(r(0), n(1, 1));
        g.add_edge(r(1), n(1, 1));

        let removed = g.remove_with_descendants(r(0));
        assert_eq!(removed, vec![n(0, 1), n(1, 1)]);
        assert!(!g.has_node(&Node::Reference(r(0))));
        assert!(!g.has_node(&Node::Reference(r(1))));
        assert!(g.is_empty());
    }

    #[test]
    fn prune_drops_references_without_readers() {
        let mut g = ReferenceGraph::new();
        g.add_edge(r(0), n(0, 1));
        g.add_edge(r(1), n(0, 1));
        g.add_edge(r(1), n(1, 1));

        g.remove_and_prune_referrers(&n(0, 1));
        assert!(!g.has_node(&Node::Reference(r(0))));
        assert!(g.has_node(&Node::Reference(r(1))));
        assert_eq!(g.reference_count(), 1);

        g.remove_and_prune_referrers(&n(1, 1));
        assert!(g.is_empty());
    }
}
