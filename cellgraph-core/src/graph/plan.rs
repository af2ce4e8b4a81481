//! Recompute Planning
//!
//! Turns a batch recomputation into an explicit cache-retention plan so that
//! peak memory is bounded by what later blocks still need, rather than by
//! every intermediate in the sort order.
//!
//! # Algorithm
//!
//! 1. Topologically sort the subgraph induced by the node universe.
//! 2. Cut the order into blocks of `block_size` nodes.
//! 3. After each block is calculated, every node in it is either *pasted*
//!    (kept, because it is a target or a later block still reads it) or
//!    *cleared* (all of its readers are in this or an earlier block).
//! 4. Values pasted for later readers are cleared in the first block after
//!    which none of their readers remain.

use std::collections::HashMap;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::digraph::DiGraph;
use super::node::Node;

/// One step of a recompute plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", content = "nodes", rename_all = "lowercase")]
pub enum RecomputeStep {
    /// Calculate these nodes, in order.
    Calc(Vec<Node>),
    /// Retain these values; listed in reverse calculation order.
    Paste(Vec<Node>),
    /// These values are no longer needed.
    Clear(Vec<Node>),
}

impl RecomputeStep {
    /// Nodes the step applies to.
    pub fn nodes(&self) -> &[Node] {
        match self {
            RecomputeStep::Calc(nodes)
            | RecomputeStep::Paste(nodes)
            | RecomputeStep::Clear(nodes) => nodes,
        }
    }
}

/// Why a plan could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    ZeroBlockSize,
    /// The induced subgraph has a cycle; this many nodes could not be ordered.
    Cyclic(usize),
}

/// Build the step list for recomputing `targets` within `universe`.
///
/// Targets outside `universe` are added to it.
pub fn plan_recompute(
    graph: &DiGraph<Node>,
    targets: &IndexSet<Node>,
    universe: &IndexSet<Node>,
    block_size: usize,
) -> Result<Vec<RecomputeStep>, PlanError> {
    if block_size == 0 {
        return Err(PlanError::ZeroBlockSize);
    }

    let mut subset = universe.clone();
    subset.extend(targets.iter().cloned());

    let ordered = graph.topological_sort(&subset).map_err(PlanError::Cyclic)?;
    let position: HashMap<&Node, usize> =
        ordered.iter().enumerate().map(|(i, n)| (n, i)).collect();

    // Position of the last reader of each node within the subset
    let last_reader = |node: &Node| -> Option<usize> {
        graph
            .successors(node)
            .filter_map(|s| position.get(s).copied())
            .max()
    };

    let mut steps = Vec::new();
    let mut retained: IndexSet<Node> = IndexSet::new();

    for (block_index, block) in ordered.chunks(block_size).enumerate() {
        let block_end = block_index * block_size + block.len();
        steps.push(RecomputeStep::Calc(block.to_vec()));

        let mut paste = Vec::new();
        let mut clear = Vec::new();

        // Release values retained earlier whose readers are now all done
        retained.retain(|node| {
            let still_needed = last_reader(node).is_some_and(|last| last >= block_end);
            if !still_needed {
                clear.push(node.clone());
            }
            still_needed
        });

        for node in block {
            if targets.contains(node) {
                paste.push(node.clone());
            } else if last_reader(node).is_some_and(|last| last >= block_end) {
                paste.push(node.clone());
                retained.insert(node.clone());
            } else {
                clear.push(node.clone());
            }
        }

        paste.reverse();
        steps.push(RecomputeStep::Paste(paste));
        steps.push(RecomputeStep::Clear(clear));
    }

    assert!(
        retained.is_empty(),
        "recompute plan left {} values retained after the last block",
        retained.len()
    );

    debug!(
        nodes = ordered.len(),
        targets = targets.len(),
        block_size,
        steps = steps.len(),
        "planned recompute"
    );

    Ok(steps)
}
