//! The interface between the engine and formula-bearing objects.
//!
//! Objects own their cached values. The engine decides when values are
//! computed, stored, and dropped, and keeps the trace graph in step with
//! every object's cache.

use crate::error::EvalError;
use crate::graph::{Node, RefId};
use crate::value::{Key, Value};

use super::executor::Executor;

/// A formula-bearing object that the engine can evaluate.
///
/// An object is either *cached*, in which case each key's value is stored
/// through [`on_store_value`](Formula::on_store_value) and kept until
/// [`on_clear_trace`](Formula::on_clear_trace), or uncached, in which case
/// every request runs the formula again.
pub trait Formula: Send + Sync {
    fn name(&self) -> &str;

    /// Parameter names. A key passed to this object must have one value per
    /// parameter.
    fn params(&self) -> &[String] {
        &[]
    }

    /// Formula source text, shown in error traces.
    fn source(&self) -> Option<&str> {
        None
    }

    /// Whether results should be memoized at all.
    fn is_cached(&self) -> bool {
        true
    }

    fn has_cached_value(&self, key: &Key) -> bool {
        self.cached_value(key).is_some()
    }

    fn cached_value(&self, key: &Key) -> Option<Value>;

    /// Every key with a cached value.
    fn cached_keys(&self) -> Vec<Key>;

    /// Compute the value for `key`. Nested evaluations go through `exec`.
    fn on_eval_formula(&self, exec: &mut Executor<'_>, key: &Key) -> Result<Value, EvalError>;

    /// Keep a freshly computed value. Called only for cached objects, at the
    /// moment the node enters the trace graph.
    fn on_store_value(&self, key: &Key, value: Value);

    /// Drop the computed value for `key`. Called whenever the node leaves the
    /// trace graph.
    fn on_clear_trace(&self, key: &Key);

    /// Store a user-supplied input value. Returns `false` if the object does
    /// not accept inputs.
    fn on_set_input(&self, _key: &Key, _value: Value) -> bool {
        false
    }

    /// Remove a user-supplied input value. Returns `true` if one was removed.
    fn on_clear_input(&self, _key: &Key) -> bool {
        false
    }

    /// Whether evaluating this object generates child objects whose nodes
    /// must be cleared along with it.
    fn is_parent(&self) -> bool {
        false
    }

    /// Nodes of the children generated by the evaluation at `key`.
    fn dynamic_children(&self, _key: &Key) -> Vec<Node> {
        Vec::new()
    }

    /// Named external values this evaluation depends on beyond the ones it
    /// read through the executor.
    fn reference_dependencies(&self, _key: &Key) -> Vec<RefId> {
        Vec::new()
    }
}
