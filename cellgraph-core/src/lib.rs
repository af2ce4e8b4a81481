//! Cellgraph Core
//!
//! This crate provides a lazily evaluated formula engine with automatic
//! dependency tracking. It implements:
//!
//! - Parameterized, memoized formulas ([`Cell`], or any [`Formula`])
//! - A trace graph recorded as a side effect of evaluation
//! - A reference graph for named external values
//! - Minimal invalidation when formulas, inputs, or references change
//! - Batch recompute planning over the trace graph
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Node identity, the trace and reference graphs, and planning
//! - `eval`: The call stack, the executor formulas run against, and cells
//! - `manager`: Invalidation over both graphs
//! - `model`: The owning coordinator and public entry point
//!
//! # Example
//!
//! ```rust
//! use cellgraph_core::{key, Cell, Model, Value};
//!
//! let mut model = Model::new();
//! let rate = model.new_reference("rate", 0.5);
//!
//! let base = model.add_cell(Cell::new("base", &["t"], |_, k| {
//!     Ok(Value::from(k.get(0).and_then(Value::as_f64).unwrap_or(0.0) * 10.0))
//! }));
//! let scaled = model.add_cell(Cell::new("scaled", &["t"], move |ex, k| {
//!     let b = ex.eval(base, k.clone())?.as_f64().unwrap_or(0.0);
//!     let r = ex.reference(rate)?.as_f64().unwrap_or(0.0);
//!     Ok(Value::from(b * r))
//! }));
//!
//! assert_eq!(model.evaluate(scaled, key![2]).unwrap(), Value::Float(10.0));
//!
//! // Changing the reference drops `scaled(2)` but keeps `base(2)`.
//! model.set_reference(rate, 2.0).unwrap();
//! assert!(model.has_cached_value(base, &key![2]));
//! assert!(!model.has_cached_value(scaled, &key![2]));
//! assert_eq!(model.evaluate(scaled, key![2]).unwrap(), Value::Float(40.0));
//! ```

pub mod config;
pub mod error;
pub mod eval;
pub mod graph;
pub mod manager;
pub mod model;
pub mod value;

pub use config::{EngineConfig, ErrorPolicy, ExecutionMode};
pub use error::{Error, ErrorKind, ErrorReport, EvalError, Result, TraceFrame};
pub use eval::{Cell, Executor, Formula, FormulaFn};
pub use graph::{Node, NodeKind, ObjectId, RecomputeStep, RefId, ReferenceGraph, TraceGraph};
pub use manager::TraceManager;
pub use model::{Model, Precedent};
pub use value::{Key, Value};
