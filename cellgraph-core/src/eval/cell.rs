//! Cell Implementation
//!
//! A Cell is a named, parameterized formula whose results are cached per
//! argument key.
//!
//! # How Cells Work
//!
//! 1. On first request for a key, the engine runs the formula and the cell
//!    stores the result.
//!
//! 2. Later requests for the same key are served from the cache.
//!
//! 3. When anything the value was computed from changes, the engine clears
//!    the key and the next request recomputes it.
//!
//! Cells can also hold input values set by the user. Inputs shadow the
//! formula and survive trace clears; only [`Formula::on_clear_input`] or
//! replacing the cell removes them.

use std::fmt::Debug;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::EvalError;
use crate::value::{Key, Value};

use super::executor::Executor;
use super::formula::Formula;

/// The computation behind a cell.
pub type FormulaFn = dyn Fn(&mut Executor<'_>, &Key) -> Result<Value, EvalError> + Send + Sync;

/// A cached, parameterized formula.
pub struct Cell {
    name: String,
    params: Vec<String>,
    formula: Arc<FormulaFn>,
    source: Option<String>,
    cached: bool,
    values: RwLock<IndexMap<Key, Value>>,
    inputs: RwLock<IndexMap<Key, Value>>,
}

impl Cell {
    /// Create a cell named `name` with the given parameter names.
    pub fn new<F>(name: impl Into<String>, params: &[&str], formula: F) -> Self
    where
        F: Fn(&mut Executor<'_>, &Key) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            formula: Arc::new(formula),
            source: None,
            cached: true,
            values: RwLock::new(IndexMap::new()),
            inputs: RwLock::new(IndexMap::new()),
        }
    }

    /// Attach source text, shown in error traces.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Turn off memoization: the formula runs on every request.
    pub fn uncached(mut self) -> Self {
        self.cached = false;
        self
    }

    pub fn is_input(&self, key: &Key) -> bool {
        self.inputs.read().contains_key(key)
    }

    /// Number of computed (non-input) values held.
    pub fn computed_len(&self) -> usize {
        self.values.read().len()
    }
}

impl Formula for Cell {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> &[String] {
        &self.params
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn is_cached(&self) -> bool {
        self.cached
    }

    fn has_cached_value(&self, key: &Key) -> bool {
        self.inputs.read().contains_key(key) || self.values.read().contains_key(key)
    }

    fn cached_value(&self, key: &Key) -> Option<Value> {
        if let Some(input) = self.inputs.read().get(key) {
            return Some(input.clone());
        }
        self.values.read().get(key).cloned()
    }

    fn cached_keys(&self) -> Vec<Key> {
        let inputs = self.inputs.read();
        let values = self.values.read();
        inputs.keys().chain(values.keys()).cloned().collect()
    }

    fn on_eval_formula(&self, exec: &mut Executor<'_>, key: &Key) -> Result<Value, EvalError> {
        (self.formula)(exec, key)
    }

    fn on_store_value(&self, key: &Key, value: Value) {
        self.values.write().insert(key.clone(), value);
    }

    fn on_clear_trace(&self, key: &Key) {
        self.values.write().shift_remove(key);
    }

    fn on_set_input(&self, key: &Key, value: Value) -> bool {
        self.values.write().shift_remove(key);
        self.inputs.write().insert(key.clone(), value);
        true
    }

    fn on_clear_input(&self, key: &Key) -> bool {
        self.inputs.write().shift_remove(key).is_some()
    }
}

impl Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("cached", &self.cached)
            .field("values", &self.values.read().len())
            .field("inputs", &self.inputs.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    fn constant() -> Cell {
        Cell::new("c", &["x"], |_, _| Ok(Value::Int(1)))
    }

    #[test]
    fn stores_and_clears_values() {
        let cell = constant();
        assert!(!cell.has_cached_value(&key![1]));

        cell.on_store_value(&key![1], Value::Int(10));
        assert_eq!(cell.cached_value(&key![1]), Some(Value::Int(10)));
        assert_eq!(cell.cached_keys(), vec![key![1]]);

        cell.on_clear_trace(&key![1]);
        assert!(!cell.has_cached_value(&key![1]));
    }

    #[test]
    fn inputs_survive_trace_clears() {
        let cell = constant();
        assert!(cell.on_set_input(&key![2], Value::Int(5)));
        cell.on_clear_trace(&key![2]);
        assert_eq!(cell.cached_value(&key![2]), Some(Value::Int(5)));
        assert!(cell.is_input(&key![2]));

        assert!(cell.on_clear_input(&key![2]));
        assert!(!cell.has_cached_value(&key![2]));
    }

    #[test]
    fn uncached_builder() {
        let cell = constant().uncached().with_source("c(x) = 1");
        assert!(!cell.is_cached());
        assert_eq!(cell.source(), Some("c(x) = 1"));
    }
}
