//! Dependency Graphs
//!
//! This module implements the two graphs the engine keeps about computed
//! values.
//!
//! # Overview
//!
//! - The **trace graph** links cached evaluations: an edge `A -> B` means
//!   A's cached value was read while B was computed. Removing A must remove
//!   everything reachable from it.
//! - The **reference graph** links named external values to the evaluations
//!   that read them, so reassigning a value drops exactly its readers.
//!
//! Both are built on one adjacency-set digraph that keeps forward and reverse
//! edges, so dependents and precedents are both cheap to walk.
//!
//! # Design Decisions
//!
//! 1. Nodes are identities (`object handle + key`), never pointers into the
//!    objects that own the cached values. Objects know nothing about graph
//!    nodes.
//!
//! 2. The graphs do not check for cycles. The executor rejects a node that
//!    is already on the live call stack before an edge could be recorded.
//!
//! 3. Neighbor order is edge-insertion order, which is the order values were
//!    read during formula execution.

mod digraph;
mod node;
mod plan;
mod reference;
mod trace;

pub use digraph::DiGraph;
pub use node::{Node, NodeKind, ObjectId, RefId};
pub use plan::{plan_recompute, PlanError, RecomputeStep};
pub use reference::ReferenceGraph;
pub use trace::TraceGraph;
