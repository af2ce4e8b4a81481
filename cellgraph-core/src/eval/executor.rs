//! Executor
//!
//! The executor evaluates nodes on behalf of formulas. Every value request
//! made from inside a formula goes through [`Executor::eval`], which is how
//! the trace graph learns who read what.
//!
//! # How It Works
//!
//! 1. On a cache hit, the value is returned and an edge is recorded from the
//!    node to the nearest cached frame on the stack. A hit is still a
//!    dependency.
//!
//! 2. On a miss, the node is pushed, its formula runs (possibly recursing
//!    back into the executor), and then:
//!    a. on success the frame is popped, the node enters the trace graph
//!       linked to its reader, buffered reference reads become reference
//!       edges, and the object stores the value;
//!    b. on failure the frame is rolled back: nothing is recorded and the
//!       node goes to the rollback log for the error trace.

use tracing::trace;

use crate::error::EvalError;
use crate::graph::{Node, ObjectId, RefId};
use crate::model::Model;
use crate::value::{Key, Value};

use super::formula::Formula;

/// Evaluation context handed to formulas.
pub struct Executor<'m> {
    model: &'m mut Model,
}

impl<'m> Executor<'m> {
    pub(crate) fn new(model: &'m mut Model) -> Self {
        Self { model }
    }

    /// Evaluate `obj` at `key`, recording the dependency of the current
    /// frame on it.
    pub fn eval(&mut self, obj: ObjectId, key: Key) -> Result<Value, EvalError> {
        let formula = self
            .model
            .object(obj)
            .ok_or(EvalError::UnknownObject(obj))?;
        check_arity(formula.as_ref(), &key)?;

        let cached = formula.is_cached();
        if cached {
            if let Some(value) = formula.cached_value(&key) {
                self.model.stack.settle_caught_failures();
                if let Some(reader) = self.model.stack.nearest_cached().cloned() {
                    self.model.trace.add_edge(Node::eval(obj, key), reader);
                }
                return Ok(value);
            }
        }

        self.model.stack.push(Node::eval(obj, key.clone()), cached)?;
        match formula.on_eval_formula(self, &key) {
            Ok(value) => {
                self.complete(formula.as_ref(), obj, &key, &value);
                Ok(value)
            }
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    /// Read the current value of a reference, recording the read against the
    /// running frame.
    pub fn reference(&mut self, reference: RefId) -> Result<Value, EvalError> {
        let value = self
            .model
            .reference_slot(reference)
            .map(|slot| slot.value.clone())
            .ok_or(EvalError::UnknownReference(reference))?;
        self.model.stack.record_reference_read(reference);
        Ok(value)
    }

    /// Number of frames currently on the call stack.
    pub fn depth(&self) -> usize {
        self.model.stack.len()
    }

    fn complete(&mut self, formula: &dyn Formula, obj: ObjectId, key: &Key, value: &Value) {
        let popped = self.model.stack.pop();

        if popped.cached {
            match popped.reader {
                Some(reader) => self.model.trace.add_edge(popped.node.clone(), reader),
                None => self.model.trace.add_node(popped.node.clone()),
            }
            for reference in popped.ref_reads {
                self.model.refgraph.add_edge(reference, popped.node.clone());
            }
            formula.on_store_value(key, value.clone());
        } else if let Some(reader) = popped.reader {
            self.model.trace.add_edge(Node::Object(obj), reader);
        }
    }

    fn abort(&mut self) {
        let (node, cached) = self.model.stack.rollback();
        // Edges from values read before the failure may have inserted the
        // node as a reader; it has no value, so it must not stay.
        if cached && self.model.trace.has_node(&node) {
            trace!(%node, "dropping partially traced node");
            self.model.trace.remove_nodes([&node]);
        }
    }
}

pub(crate) fn check_arity(formula: &dyn Formula, key: &Key) -> Result<(), EvalError> {
    let expected = formula.params().len();
    if expected != key.len() {
        return Err(EvalError::Arity {
            name: formula.name().to_string(),
            expected,
            given: key.len(),
        });
    }
    Ok(())
}
