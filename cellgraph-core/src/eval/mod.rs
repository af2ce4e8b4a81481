//! Evaluation
//!
//! This module implements the call-stack interpreter that runs formulas and
//! builds the trace graph as a side effect.
//!
//! # Concepts
//!
//! ## Formulas
//!
//! A [`Formula`] is any object the engine can evaluate at an argument key.
//! [`Cell`] is the stock implementation: a closure plus a per-key cache.
//!
//! ## Executor
//!
//! The [`Executor`] is handed to every running formula. Requests for other
//! values go through it, which is how dependencies are discovered: nothing
//! has to be declared up front.
//!
//! ## Call stack
//!
//! The call stack holds the nodes that are mid-evaluation. It rejects a node
//! that is already on it (a cycle) and enforces the configured depth limit.
//!
//! # Implementation Notes
//!
//! The stack is owned by the [`Model`](crate::Model), not by a thread-local,
//! so separate models never share evaluation state.

mod cell;
mod executor;
mod formula;
mod stack;

pub use cell::{Cell, FormulaFn};
pub use executor::Executor;
pub use formula::Formula;

pub(crate) use executor::check_arity;
pub(crate) use stack::CallStack;
