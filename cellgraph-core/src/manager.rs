//! Trace Manager
//!
//! Orchestrates invalidation: computing the set of stale nodes, removing them
//! from both graphs, and telling each owning object to drop its value.
//!
//! # Algorithm
//!
//! Clearing a node walks the trace graph depth-first from it. At every node
//! whose object generates child objects, the walk also descends into the
//! nodes of those children before finishing the node. The result is one
//! postorder sequence in which every dependent precedes what it depends on.
//! Everything in that sequence is removed; nothing outside it is touched.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::eval::Formula;
use crate::graph::{Node, ObjectId, RefId, ReferenceGraph, TraceGraph};

/// Borrowed view of the state invalidation works on.
pub struct TraceManager<'a> {
    objects: &'a [Option<Arc<dyn Formula>>],
    trace: &'a mut TraceGraph,
    refgraph: &'a mut ReferenceGraph,
}

impl<'a> TraceManager<'a> {
    pub(crate) fn new(
        objects: &'a [Option<Arc<dyn Formula>>],
        trace: &'a mut TraceGraph,
        refgraph: &'a mut ReferenceGraph,
    ) -> Self {
        Self {
            objects,
            trace,
            refgraph,
        }
    }

    fn object(&self, obj: ObjectId) -> Option<&Arc<dyn Formula>> {
        self.objects.get(obj.index()).and_then(Option::as_ref)
    }

    /// The closure of `node` over the trace graph and dynamic children, in
    /// postorder.
    pub fn extended_closure(&self, node: &Node) -> Vec<Node> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let objects = self.objects;

        self.trace
            .extended_postorder(node, &mut visited, &mut order, |n| match n {
                Node::Eval { obj, key } => objects
                    .get(obj.index())
                    .and_then(Option::as_ref)
                    .filter(|f| f.is_parent())
                    .map(|f| f.dynamic_children(key))
                    .unwrap_or_default(),
                _ => Vec::new(),
            });
        order
    }

    /// Remove `node` and everything computed from it, dropping their values.
    ///
    /// Returns the removed nodes in postorder. Clearing an absent node is a
    /// no-op.
    pub fn clear_with_descendants(&mut self, node: &Node) -> Vec<Node> {
        let closure = self.extended_closure(node);
        if closure.is_empty() {
            return closure;
        }

        let pruned = self.trace.remove_nodes(&closure);
        for removed in closure.iter().chain(&pruned) {
            self.refgraph.remove_and_prune_referrers(removed);
        }
        for removed in &closure {
            self.fire_on_clear(removed);
        }

        debug!(%node, removed = closure.len(), pruned = pruned.len(), "cleared trace");
        closure
    }

    /// Clear every node belonging to `obj`, for redefinition or deletion.
    pub fn clear_object(&mut self, obj: ObjectId) -> Vec<Node> {
        let mut candidates: Vec<Node> = Vec::new();
        if let Some(formula) = self.object(obj) {
            if formula.is_cached() {
                candidates.extend(
                    formula
                        .cached_keys()
                        .into_iter()
                        .map(|key| Node::eval(obj, key)),
                );
            }
        }
        candidates.extend(self.trace.nodes_for_object(obj));

        let mut removed_set: HashSet<Node> = HashSet::new();
        let mut removed = Vec::new();
        for node in candidates {
            if removed_set.contains(&node) {
                continue;
            }
            for n in self.clear_with_descendants(&node) {
                if removed_set.insert(n.clone()) {
                    removed.push(n);
                }
            }
        }

        debug!(%obj, removed = removed.len(), "cleared object");
        removed
    }

    /// Drop everything that read `reference`, directly or transitively.
    pub fn clear_reference_referrers(&mut self, reference: RefId) -> Vec<Node> {
        let readers = self.refgraph.remove_with_descendants(reference);

        let mut removed_set: HashSet<Node> = HashSet::new();
        let mut removed = Vec::new();
        for reader in readers {
            if removed_set.contains(&reader) || !self.trace.has_node(&reader) {
                continue;
            }
            for n in self.clear_with_descendants(&reader) {
                if removed_set.insert(n.clone()) {
                    removed.push(n);
                }
            }
        }

        debug!(%reference, removed = removed.len(), "cleared reference readers");
        removed
    }

    fn fire_on_clear(&self, node: &Node) {
        if let Node::Eval { obj, key } = node {
            if let Some(formula) = self.object(*obj) {
                formula.on_clear_trace(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Cell;
    use crate::key;
    use crate::value::Value;

    fn cell(name: &str) -> Arc<dyn Formula> {
        Arc::new(Cell::new(name, &["t"], |_, _| Ok(Value::Null)))
    }

    fn node(obj: usize, t: i64) -> Node {
        Node::eval(ObjectId::from_index(obj), key![t])
    }

    /// `0(1) -> 1(1) -> 2(1)` with values stored and `ref#0` read by `1(1)`.
    fn setup() -> (Vec<Option<Arc<dyn Formula>>>, TraceGraph, ReferenceGraph) {
        let objects: Vec<_> = ["a", "b", "c"].into_iter().map(|n| Some(cell(n))).collect();
        let mut trace = TraceGraph::new();
        let mut refgraph = ReferenceGraph::new();

        trace.add_edge(node(0, 1), node(1, 1));
        trace.add_edge(node(1, 1), node(2, 1));
        refgraph.add_edge(RefId::from_index(0), node(1, 1));
        for (i, obj) in objects.iter().enumerate() {
            obj.as_ref().unwrap().on_store_value(&key![1], Value::from(i as i64));
        }
        (objects, trace, refgraph)
    }

    #[test]
    fn clear_drops_values_and_references() {
        let (objects, mut trace, mut refgraph) = setup();
        let mut manager = TraceManager::new(&objects, &mut trace, &mut refgraph);

        let removed = manager.clear_with_descendants(&node(1, 1));
        assert_eq!(removed, vec![node(2, 1), node(1, 1)]);

        assert!(objects[0].as_ref().unwrap().has_cached_value(&key![1]));
        assert!(!objects[1].as_ref().unwrap().has_cached_value(&key![1]));
        assert!(!objects[2].as_ref().unwrap().has_cached_value(&key![1]));
        assert!(trace.has_node(&node(0, 1)));
        assert!(refgraph.is_empty());
    }

    #[test]
    fn clearing_absent_node_touches_nothing() {
        let (objects, mut trace, mut refgraph) = setup();
        let mut manager = TraceManager::new(&objects, &mut trace, &mut refgraph);

        assert!(manager.clear_with_descendants(&node(0, 7)).is_empty());
        assert_eq!(trace.len(), 3);
    }

    #[test]
    fn clear_object_covers_every_key() {
        let (objects, mut trace, mut refgraph) = setup();
        trace.add_edge(node(0, 2), node(2, 2));
        objects[0].as_ref().unwrap().on_store_value(&key![2], Value::Int(0));

        let mut manager = TraceManager::new(&objects, &mut trace, &mut refgraph);
        let removed = manager.clear_object(ObjectId::from_index(0));
        assert_eq!(removed.len(), 5);
        assert!(trace.is_empty());
    }

    #[test]
    fn reference_readers_are_cleared_transitively() {
        let (objects, mut trace, mut refgraph) = setup();
        let mut manager = TraceManager::new(&objects, &mut trace, &mut refgraph);

        let removed = manager.clear_reference_referrers(RefId::from_index(0));
        assert_eq!(removed, vec![node(2, 1), node(1, 1)]);
        assert_eq!(trace.len(), 1);
        assert!(refgraph.is_empty());
    }
}
