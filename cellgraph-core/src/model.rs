//! Model
//!
//! The model is the central coordinator that owns formula objects, named
//! references, both dependency graphs, and the call stack. Every public
//! operation of the engine is a method here.
//!
//! # How It Works
//!
//! 1. Objects and references are registered and get arena handles.
//!
//! 2. [`Model::evaluate`] establishes a fresh evaluation context and runs the
//!    requested formula through an [`Executor`]; nested requests record
//!    trace edges as values are read.
//!
//! 3. Redefining, deleting, or reassigning anything goes through the
//!    [`TraceManager`], which removes every value computed from the old
//!    state.
//!
//! # Threading
//!
//! Evaluation is single-threaded. In [`ExecutionMode::Deep`] the outermost
//! evaluation runs on a dedicated thread with a larger stack while the caller
//! blocks on it; nothing runs concurrently.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use indexmap::IndexSet;
use tracing::{debug_span, error, warn};

use crate::config::{EngineConfig, ErrorPolicy, ExecutionMode};
use crate::error::{Error, ErrorKind, ErrorReport, EvalError, Result, TraceFrame};
use crate::eval::{check_arity, CallStack, Cell, Executor, Formula};
use crate::graph::{plan_recompute, Node, ObjectId, PlanError, RecomputeStep, RefId};
use crate::graph::{ReferenceGraph, TraceGraph};
use crate::manager::TraceManager;
use crate::value::{Key, Value};

/// A named external value.
#[derive(Debug, Clone)]
pub(crate) struct ReferenceSlot {
    pub name: String,
    pub value: Value,
}

/// A precedent of a node together with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct Precedent {
    pub node: Node,
    /// Cached value for evaluation nodes, current value for references.
    pub value: Option<Value>,
}

pub struct Model {
    pub(crate) objects: Vec<Option<Arc<dyn Formula>>>,
    pub(crate) references: Vec<Option<ReferenceSlot>>,
    pub(crate) trace: TraceGraph,
    pub(crate) refgraph: ReferenceGraph,
    pub(crate) stack: CallStack,
    config: EngineConfig,
    last_error: Option<ErrorReport>,
}

impl Model {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            objects: Vec::new(),
            references: Vec::new(),
            trace: TraceGraph::new(),
            refgraph: ReferenceGraph::new(),
            stack: CallStack::new(config.max_depth),
            config,
            last_error: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    pub fn add_object(&mut self, formula: Arc<dyn Formula>) -> ObjectId {
        let id = ObjectId::from_index(self.objects.len());
        self.objects.push(Some(formula));
        id
    }

    pub fn add_cell(&mut self, cell: Cell) -> ObjectId {
        self.add_object(Arc::new(cell))
    }

    pub fn object(&self, obj: ObjectId) -> Option<Arc<dyn Formula>> {
        self.objects.get(obj.index()).and_then(Clone::clone)
    }

    fn require_object(&self, obj: ObjectId) -> Result<Arc<dyn Formula>> {
        self.object(obj).ok_or(Error::UnknownObject(obj))
    }

    /// Replace the formula of `obj`, clearing everything computed from the
    /// old one.
    pub fn redefine(&mut self, obj: ObjectId, formula: Arc<dyn Formula>) -> Result<Vec<Node>> {
        self.require_object(obj)?;
        let removed = self.manager().clear_object(obj);
        self.objects[obj.index()] = Some(formula);
        Ok(removed)
    }

    /// Remove `obj`, clearing everything computed from it.
    pub fn delete_object(&mut self, obj: ObjectId) -> Result<Vec<Node>> {
        self.require_object(obj)?;
        let removed = self.manager().clear_object(obj);
        self.objects[obj.index()] = None;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    pub fn new_reference(&mut self, name: impl Into<String>, value: impl Into<Value>) -> RefId {
        let id = RefId::from_index(self.references.len());
        self.references.push(Some(ReferenceSlot {
            name: name.into(),
            value: value.into(),
        }));
        id
    }

    pub(crate) fn reference_slot(&self, reference: RefId) -> Option<&ReferenceSlot> {
        self.references.get(reference.index()).and_then(Option::as_ref)
    }

    pub fn reference_value(&self, reference: RefId) -> Result<Value> {
        self.reference_slot(reference)
            .map(|slot| slot.value.clone())
            .ok_or(Error::UnknownReference(reference))
    }

    /// Reassign a reference, clearing every value that read the old one.
    pub fn set_reference(&mut self, reference: RefId, value: impl Into<Value>) -> Result<Vec<Node>> {
        let removed = self.invalidate_reference(reference)?;
        if let Some(slot) = self.references[reference.index()].as_mut() {
            slot.value = value.into();
        }
        Ok(removed)
    }

    pub fn delete_reference(&mut self, reference: RefId) -> Result<Vec<Node>> {
        let removed = self.invalidate_reference(reference)?;
        self.references[reference.index()] = None;
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    /// Set a user input for `obj` at `key`, clearing whatever was computed
    /// from the previous value.
    pub fn set_input(&mut self, obj: ObjectId, key: Key, value: impl Into<Value>) -> Result<Vec<Node>> {
        let formula = self.require_object(obj)?;
        check_arity(formula.as_ref(), &key).map_err(|e| self.api_error(e))?;

        let removed = self.manager().clear_with_descendants(&Node::eval(obj, key.clone()));
        if !formula.on_set_input(&key, value.into()) {
            return Err(Error::InputNotAccepted(formula.name().to_string()));
        }
        Ok(removed)
    }

    /// Remove a user input, clearing whatever was computed from it.
    pub fn clear_input(&mut self, obj: ObjectId, key: Key) -> Result<Vec<Node>> {
        let formula = self.require_object(obj)?;
        let removed = self.manager().clear_with_descendants(&Node::eval(obj, key.clone()));
        formula.on_clear_input(&key);
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate `obj` at `key`.
    ///
    /// Served from cache when possible. Under [`ErrorPolicy::Report`] a
    /// failed evaluation returns [`Value::Null`] and leaves its trace in
    /// [`Model::last_error`].
    pub fn evaluate(&mut self, obj: ObjectId, key: Key) -> Result<Value> {
        let formula = self.require_object(obj)?;
        check_arity(formula.as_ref(), &key).map_err(|e| self.api_error(e))?;

        if formula.is_cached() {
            if let Some(value) = formula.cached_value(&key) {
                return Ok(value);
            }
        }

        match self.config.execution_mode {
            ExecutionMode::Direct => self.run_outermost(obj, key),
            ExecutionMode::Deep => self.run_on_deep_stack(obj, key),
        }
    }

    fn run_on_deep_stack(&mut self, obj: ObjectId, key: Key) -> Result<Value> {
        let stack_size = self.config.deep_stack_size;
        let fallback_key = key.clone();

        let outcome = thread::scope(|scope| {
            let spawned = thread::Builder::new()
                .name("cellgraph-eval".to_string())
                .stack_size(stack_size)
                .spawn_scoped(scope, || self.run_outermost(obj, key));
            match spawned {
                Ok(handle) => Some(
                    handle
                        .join()
                        .unwrap_or_else(|payload| panic::resume_unwind(payload)),
                ),
                Err(err) => {
                    warn!(%err, stack_size, "could not start evaluation thread, running directly");
                    None
                }
            }
        });

        match outcome {
            Some(result) => result,
            None => self.run_outermost(obj, fallback_key),
        }
    }

    /// Establish a fresh evaluation context and evaluate.
    fn run_outermost(&mut self, obj: ObjectId, key: Key) -> Result<Value> {
        let span = debug_span!("evaluate", %obj, %key);
        let _enter = span.enter();

        self.stack.reset(self.config.max_depth);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| Executor::new(self).eval(obj, key)));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                self.unwind_stale_frames();
                panic::resume_unwind(payload);
            }
        };
        assert!(
            self.stack.is_empty(),
            "call stack holds {} frame(s) after the outermost evaluation",
            self.stack.len()
        );

        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let report = self.build_report(&err);
                match self.config.error_policy {
                    ErrorPolicy::Raise => Err(report.into()),
                    ErrorPolicy::Report => {
                        error!("{report}");
                        self.last_error = Some(report);
                        Ok(Value::Null)
                    }
                }
            }
        }
    }

    /// Roll back the frames a panicking formula left on the stack, so that
    /// no node without a value stays in the trace graph.
    fn unwind_stale_frames(&mut self) {
        while !self.stack.is_empty() {
            let (node, cached) = self.stack.rollback();
            if cached && self.trace.has_node(&node) {
                self.trace.remove_nodes([&node]);
            }
        }
        self.stack.take_rollback_log();
    }

    fn build_report(&mut self, err: &EvalError) -> ErrorReport {
        let kind = match err {
            EvalError::DepthExceeded { .. } => ErrorKind::DeepReference,
            EvalError::Circular { .. } => ErrorKind::Circular,
            _ => ErrorKind::Formula,
        };

        let log = self.stack.take_rollback_log();
        let source = log
            .first()
            .and_then(|n| n.object())
            .and_then(|obj| self.object(obj))
            .and_then(|f| f.source().map(str::to_string));
        let frames = log.iter().rev().map(|n| self.trace_frame(n)).collect();

        let mut report = ErrorReport::new(kind, err, frames, source, self.config.max_trace_lines);
        if let EvalError::Circular { node } = err {
            report.message = format!(
                "circular reference: {} was requested while being evaluated",
                self.node_name(node)
            );
        }
        report
    }

    fn trace_frame(&self, node: &Node) -> TraceFrame {
        let formula = node.object().and_then(|obj| self.object(obj));
        let locals = match (node, &formula) {
            (Node::Eval { key, .. }, Some(f)) => f
                .params()
                .iter()
                .cloned()
                .zip(key.iter().cloned())
                .collect(),
            _ => Vec::new(),
        };
        let line = formula
            .as_ref()
            .and_then(|f| f.source())
            .and_then(|src| src.lines().find(|l| !l.trim().is_empty()))
            .map(str::to_string);

        TraceFrame {
            node: node.clone(),
            name: self.node_name(node),
            locals,
            line,
        }
    }

    /// Errors from API calls made outside any formula are returned bare.
    fn api_error(&self, err: EvalError) -> Error {
        match err {
            EvalError::Arity {
                name,
                expected,
                given,
            } => Error::Arity {
                name,
                expected,
                given,
            },
            EvalError::UnknownObject(obj) => Error::UnknownObject(obj),
            EvalError::UnknownReference(r) => Error::UnknownReference(r),
            other => ErrorReport::new(
                ErrorKind::Formula,
                &other,
                Vec::new(),
                None,
                self.config.max_trace_lines,
            )
            .into(),
        }
    }

    /// The trace of the last failure reported under
    /// [`ErrorPolicy::Report`].
    pub fn last_error(&self) -> Option<&ErrorReport> {
        self.last_error.as_ref()
    }

    pub fn take_last_error(&mut self) -> Option<ErrorReport> {
        self.last_error.take()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn trace_graph(&self) -> &TraceGraph {
        &self.trace
    }

    pub fn reference_graph(&self) -> &ReferenceGraph {
        &self.refgraph
    }

    pub fn has_node(&self, node: &Node) -> bool {
        self.trace.has_node(node)
    }

    pub fn trace_node_count(&self) -> usize {
        self.trace.len()
    }

    /// Number of references currently read by at least one cached value.
    pub fn reference_node_count(&self) -> usize {
        self.refgraph.reference_count()
    }

    pub fn has_cached_value(&self, obj: ObjectId, key: &Key) -> bool {
        self.object(obj)
            .map(|f| f.has_cached_value(key))
            .unwrap_or(false)
    }

    /// Direct trace-graph predecessors: the cached values `obj(key)` read.
    pub fn predecessors(&self, obj: ObjectId, key: Key) -> Vec<Node> {
        self.trace
            .predecessors(&Node::eval(obj, key))
            .cloned()
            .collect()
    }

    /// Direct trace-graph successors: the cached values that read `obj(key)`.
    pub fn successors(&self, obj: ObjectId, key: Key) -> Vec<Node> {
        self.trace
            .successors(&Node::eval(obj, key))
            .cloned()
            .collect()
    }

    /// Predecessors followed by the references `obj(key)` read, each with its
    /// current value.
    pub fn precedents(&self, obj: ObjectId, key: Key) -> Vec<Precedent> {
        let node = Node::eval(obj, key);
        let mut seen: IndexSet<Node> = self.trace.predecessors(&node).cloned().collect();
        seen.extend(self.refgraph.references_of(&node).map(Node::Reference));
        if let (Some(formula), Some(key)) = (self.object(obj), node.key()) {
            seen.extend(
                formula
                    .reference_dependencies(key)
                    .into_iter()
                    .map(Node::Reference),
            );
        }

        seen.into_iter()
            .map(|node| {
                let value = self.current_value(&node);
                Precedent { node, value }
            })
            .collect()
    }

    fn current_value(&self, node: &Node) -> Option<Value> {
        match node {
            Node::Eval { obj, key } => self.object(*obj).and_then(|f| f.cached_value(key)),
            Node::Reference(r) => self.reference_slot(*r).map(|slot| slot.value.clone()),
            Node::Object(_) => None,
        }
    }

    /// Human-readable name of a node, e.g. `foo(t=3)`.
    pub fn node_name(&self, node: &Node) -> String {
        match node {
            Node::Eval { obj, key } => match self.object(*obj) {
                Some(f) if f.params().len() == key.len() => {
                    let args: Vec<String> = f
                        .params()
                        .iter()
                        .zip(key.iter())
                        .map(|(p, v)| format!("{p}={v}"))
                        .collect();
                    format!("{}({})", f.name(), args.join(", "))
                }
                Some(f) => format!("{}{key}", f.name()),
                None => node.to_string(),
            },
            Node::Object(obj) => self
                .object(*obj)
                .map(|f| f.name().to_string())
                .unwrap_or_else(|| node.to_string()),
            Node::Reference(r) => self
                .reference_slot(*r)
                .map(|slot| slot.name.clone())
                .unwrap_or_else(|| node.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    fn manager(&mut self) -> TraceManager<'_> {
        TraceManager::new(&self.objects, &mut self.trace, &mut self.refgraph)
    }

    /// Clear `obj(key)` and everything computed from it.
    pub fn invalidate(&mut self, obj: ObjectId, key: Key) -> Vec<Node> {
        self.manager().clear_with_descendants(&Node::eval(obj, key))
    }

    /// Clear every node of `obj` and everything computed from them.
    pub fn invalidate_object(&mut self, obj: ObjectId) -> Result<Vec<Node>> {
        self.require_object(obj)?;
        Ok(self.manager().clear_object(obj))
    }

    /// Clear everything that read `reference`.
    pub fn invalidate_reference(&mut self, reference: RefId) -> Result<Vec<Node>> {
        self.reference_slot(reference)
            .ok_or(Error::UnknownReference(reference))?;
        Ok(self.manager().clear_reference_referrers(reference))
    }

    /// Plan a batch recomputation of `targets` within `universe`, in blocks
    /// of `block_size` nodes. See [`plan_recompute`].
    pub fn plan_recompute(
        &self,
        targets: &IndexSet<Node>,
        universe: &IndexSet<Node>,
        block_size: usize,
    ) -> Result<Vec<RecomputeStep>> {
        plan_recompute(self.trace.inner(), targets, universe, block_size).map_err(|e| match e {
            PlanError::ZeroBlockSize => Error::InvalidBlockSize,
            PlanError::Cyclic(n) => Error::CyclicPlan(n),
        })
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("objects", &self.objects.iter().flatten().count())
            .field("references", &self.references.iter().flatten().count())
            .field("trace_nodes", &self.trace.len())
            .field("reference_nodes", &self.refgraph.reference_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    fn direct() -> Model {
        Model::with_config(EngineConfig::new().with_execution_mode(ExecutionMode::Direct))
    }

    #[test]
    fn evaluate_caches_and_traces() {
        let mut model = direct();
        let base = model.add_cell(Cell::new("base", &["x"], |_, k| {
            Ok(Value::Int(k.get(0).and_then(Value::as_i64).unwrap_or(0) * 2))
        }));
        let top = model.add_cell(Cell::new("top", &["x"], move |ex, k| {
            let v = ex.eval(base, k.clone())?;
            Ok(Value::Int(v.as_i64().unwrap_or(0) + 1))
        }));

        assert_eq!(model.evaluate(top, key![4]).unwrap(), Value::Int(9));
        assert!(model.has_node(&Node::eval(base, key![4])));
        assert!(model.has_node(&Node::eval(top, key![4])));
        assert_eq!(model.predecessors(top, key![4]), vec![Node::eval(base, key![4])]);
        assert_eq!(model.successors(base, key![4]), vec![Node::eval(top, key![4])]);
        assert_eq!(model.trace_node_count(), 2);
        assert_eq!(model.reference_node_count(), 0);
    }

    #[test]
    fn arity_and_unknown_objects_are_api_errors() {
        let mut model = direct();
        let c = model.add_cell(Cell::new("c", &["x"], |_, _| Ok(Value::Null)));
        assert!(matches!(
            model.evaluate(c, key![1, 2]),
            Err(Error::Arity { expected: 1, given: 2, .. })
        ));
        model.delete_object(c).unwrap();
        assert!(matches!(model.evaluate(c, key![1]), Err(Error::UnknownObject(_))));
    }

    #[test]
    fn node_names_bind_parameters() {
        let mut model = direct();
        let c = model.add_cell(Cell::new("foo", &["t", "u"], |_, _| Ok(Value::Null)));
        let r = model.new_reference("x", 1);
        assert_eq!(model.node_name(&Node::eval(c, key![3, "a"])), "foo(t=3, u=\"a\")");
        assert_eq!(model.node_name(&Node::Object(c)), "foo");
        assert_eq!(model.node_name(&Node::Reference(r)), "x");
    }

    #[test]
    fn report_policy_returns_null() {
        let mut model = Model::with_config(
            EngineConfig::new()
                .with_execution_mode(ExecutionMode::Direct)
                .with_error_policy(ErrorPolicy::Report),
        );
        let c = model.add_cell(Cell::new("bad", &[], |_, _| Err(EvalError::msg("nope"))));
        assert_eq!(model.evaluate(c, key![]).unwrap(), Value::Null);
        let report = model.last_error().unwrap();
        assert_eq!(report.kind, ErrorKind::Formula);
        assert_eq!(report.message, "nope");
        assert!(!model.has_cached_value(c, &key![]));
    }
}
