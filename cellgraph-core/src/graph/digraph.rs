//! Adjacency-Set Directed Graph
//!
//! Shared storage for the trace graph and the reference graph. Every node
//! keeps both its predecessor and successor sets so traversal is cheap in
//! both directions.
//!
//! Neighbor sets are `IndexSet`s: queries return neighbors in the order the
//! edges were first recorded, which is the order values were read while
//! formulas ran. Removals use `shift_remove` on neighbor sets to keep that
//! order intact.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

/// Edges incident to one node.
#[derive(Debug, Clone)]
struct Adjacency<N> {
    /// Nodes this node was computed from.
    preds: IndexSet<N>,
    /// Nodes computed from this node.
    succs: IndexSet<N>,
}

impl<N> Default for Adjacency<N> {
    fn default() -> Self {
        Self {
            preds: IndexSet::new(),
            succs: IndexSet::new(),
        }
    }
}

/// A directed graph over hashable node identities.
#[derive(Debug, Clone)]
pub struct DiGraph<N> {
    nodes: IndexMap<N, Adjacency<N>>,
}

impl<N> Default for DiGraph<N> {
    fn default() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }
}

impl<N> DiGraph<N>
where
    N: Clone + Eq + Hash,
{
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check if `node` is in the graph.
    pub fn contains(&self, node: &N) -> bool {
        self.nodes.contains_key(node)
    }

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.nodes.keys()
    }

    /// Insert a node if absent. Returns `true` if it was inserted.
    pub fn add_node(&mut self, node: N) -> bool {
        if self.nodes.contains_key(&node) {
            return false;
        }
        self.nodes.insert(node, Adjacency::default());
        true
    }

    /// Add an edge `src -> dst`, inserting both endpoints if absent.
    ///
    /// No cycle check is performed.
    pub fn add_edge(&mut self, src: N, dst: N) {
        self.nodes
            .entry(src.clone())
            .or_default()
            .succs
            .insert(dst.clone());
        self.nodes.entry(dst).or_default().preds.insert(src);
    }

    /// Check if the edge `src -> dst` exists.
    pub fn has_edge(&self, src: &N, dst: &N) -> bool {
        self.nodes
            .get(src)
            .map(|adj| adj.succs.contains(dst))
            .unwrap_or(false)
    }

    /// Remove a node and all edges involving it.
    ///
    /// Returns `false` if the node was absent.
    pub fn remove_node(&mut self, node: &N) -> bool {
        let Some(adj) = self.nodes.swap_remove(node) else {
            return false;
        };

        for pred in &adj.preds {
            if let Some(p) = self.nodes.get_mut(pred) {
                p.succs.shift_remove(node);
            }
        }
        for succ in &adj.succs {
            if let Some(s) = self.nodes.get_mut(succ) {
                s.preds.shift_remove(node);
            }
        }
        true
    }

    /// Remove the edge `src -> dst`, keeping both endpoints.
    pub fn remove_edge(&mut self, src: &N, dst: &N) {
        if let Some(adj) = self.nodes.get_mut(src) {
            adj.succs.shift_remove(dst);
        }
        if let Some(adj) = self.nodes.get_mut(dst) {
            adj.preds.shift_remove(src);
        }
    }

    /// Direct predecessors in edge-insertion order. Empty if absent.
    pub fn predecessors(&self, node: &N) -> impl Iterator<Item = &N> {
        self.nodes.get(node).into_iter().flat_map(|adj| adj.preds.iter())
    }

    /// Direct successors in edge-insertion order. Empty if absent.
    pub fn successors(&self, node: &N) -> impl Iterator<Item = &N> {
        self.nodes.get(node).into_iter().flat_map(|adj| adj.succs.iter())
    }

    /// Number of successors of `node`; zero if absent.
    pub fn out_degree(&self, node: &N) -> usize {
        self.nodes.get(node).map(|adj| adj.succs.len()).unwrap_or(0)
    }

    /// Number of predecessors of `node`; zero if absent.
    pub fn in_degree(&self, node: &N) -> usize {
        self.nodes.get(node).map(|adj| adj.preds.len()).unwrap_or(0)
    }

    /// All nodes reachable from `node`, excluding `node` itself.
    pub fn descendants(&self, node: &N) -> IndexSet<N> {
        let mut seen = IndexSet::new();
        let mut queue: VecDeque<&N> = self.successors(node).collect();

        while let Some(next) = queue.pop_front() {
            if next == node || !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.successors(next));
        }
        seen
    }

    /// Depth-first postorder from `start`, following successors plus any
    /// extra neighbors supplied by `expand`.
    ///
    /// Extra neighbors not present in the graph are skipped. Nodes already in
    /// `visited` are not entered again, so several calls can share one
    /// `visited` set to produce a single postorder over their union.
    pub fn postorder_with<F>(
        &self,
        start: &N,
        visited: &mut HashSet<N>,
        out: &mut Vec<N>,
        mut expand: F,
    ) where
        F: FnMut(&N) -> Vec<N>,
    {
        if !self.contains(start) || !visited.insert(start.clone()) {
            return;
        }

        let mut stack: Vec<(N, Vec<N>)> = Vec::new();
        let pending = self.neighbors_for_walk(start, &mut expand);
        stack.push((start.clone(), pending));

        while let Some((_, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(next) => {
                    if visited.insert(next.clone()) {
                        let pending = self.neighbors_for_walk(&next, &mut expand);
                        stack.push((next, pending));
                    }
                }
                None => {
                    if let Some((done, _)) = stack.pop() {
                        out.push(done);
                    }
                }
            }
        }
    }

    /// Successors followed by expansion nodes, reversed so that popping
    /// from the back visits them in insertion order.
    fn neighbors_for_walk<F>(&self, node: &N, expand: &mut F) -> Vec<N>
    where
        F: FnMut(&N) -> Vec<N>,
    {
        let mut next: Vec<N> = self.successors(node).cloned().collect();
        next.extend(expand(node).into_iter().filter(|n| self.contains(n)));
        next.reverse();
        next
    }

    /// Topologically sort the subgraph induced by `subset`.
    ///
    /// Ties are broken by the order of `subset`. Nodes of `subset` that are
    /// not in the graph are treated as isolated. Returns the number of nodes
    /// that could not be ordered if the induced subgraph has a cycle.
    pub fn topological_sort(&self, subset: &IndexSet<N>) -> Result<Vec<N>, usize> {
        let mut in_degree: HashMap<&N, usize> = HashMap::with_capacity(subset.len());
        let mut queue = VecDeque::new();
        let mut result = Vec::with_capacity(subset.len());

        // Only count edges inside the subset
        for node in subset {
            let degree = self.predecessors(node).filter(|p| subset.contains(*p)).count();
            in_degree.insert(node, degree);
            if degree == 0 {
                queue.push_back(node);
            }
        }

        // Kahn's algorithm
        while let Some(node) = queue.pop_front() {
            result.push(node.clone());

            for succ in self.successors(node) {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        if let Some(key) = subset.get(succ) {
                            queue.push_back(key);
                        }
                    }
                }
            }
        }

        if result.len() == subset.len() {
            Ok(result)
        } else {
            Err(subset.len() - result.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> DiGraph<&'static str> {
        let mut g = DiGraph::new();
        g.add_edge("a", "b");
        g.add_edge("b", "c");
        g
    }

    #[test]
    fn add_edge_inserts_endpoints() {
        let g = chain();
        assert_eq!(g.len(), 3);
        assert!(g.has_edge(&"a", &"b"));
        assert!(!g.has_edge(&"b", &"a"));
        assert_eq!(g.predecessors(&"c").collect::<Vec<_>>(), vec![&"b"]);
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut g = chain();
        assert!(g.remove_node(&"b"));
        assert!(!g.remove_node(&"b"));
        assert_eq!(g.out_degree(&"a"), 0);
        assert_eq!(g.in_degree(&"c"), 0);
    }

    #[test]
    fn neighbor_order_follows_insertion() {
        let mut g = DiGraph::new();
        g.add_edge("x", "t");
        g.add_edge("z", "t");
        g.add_edge("y", "t");
        g.remove_edge(&"z", &"t");
        g.add_edge("z", "t");
        let preds: Vec<_> = g.predecessors(&"t").copied().collect();
        assert_eq!(preds, vec!["x", "y", "z"]);
    }

    #[test]
    fn descendants_exclude_start() {
        let g = chain();
        let d = g.descendants(&"a");
        assert_eq!(d.into_iter().collect::<Vec<_>>(), vec!["b", "c"]);
        assert!(g.descendants(&"missing").is_empty());
    }

    #[test]
    fn postorder_visits_dependents_first() {
        let mut g = chain();
        g.add_edge("a", "d");
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        g.postorder_with(&"a", &mut visited, &mut out, |_| Vec::new());
        assert_eq!(out, vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn postorder_follows_expansion() {
        let mut g = chain();
        g.add_node("child");
        g.add_edge("child", "leaf");
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        g.postorder_with(&"b", &mut visited, &mut out, |n| {
            if *n == "b" {
                vec!["child", "not-in-graph"]
            } else {
                Vec::new()
            }
        });
        assert_eq!(out, vec!["c", "leaf", "child", "b"]);
    }

    #[test]
    fn topological_sort_of_subset() {
        let mut g = chain();
        g.add_edge("a", "c");
        let subset: IndexSet<_> = ["c", "b", "a"].into_iter().collect();
        assert_eq!(g.topological_sort(&subset), Ok(vec!["a", "b", "c"]));

        g.add_edge("c", "a");
        assert_eq!(g.topological_sort(&subset), Err(3));
    }
}
