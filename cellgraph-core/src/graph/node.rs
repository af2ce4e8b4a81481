//! Graph Nodes
//!
//! This module defines the identities that live in the dependency graphs.
//! The graphs never hold formula objects themselves, only lightweight handles
//! into the model's object and reference arenas plus copies of argument keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Key;

/// Handle of a formula-bearing object in a model's object arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u32);

impl ObjectId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("object arena exceeds u32::MAX entries"))
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Handle of a named external value in a model's reference arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefId(u32);

impl RefId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("reference arena exceeds u32::MAX entries"))
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}", self.0)
    }
}

/// The kind of a node, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// One cacheable invocation: an object plus an argument key.
    Eval,

    /// An object as a whole. Recorded for non-cached intermediate formulas so
    /// that their callers stay reachable when the formula is redefined.
    Object,

    /// A named external value.
    Reference,
}

/// A node of the trace graph or the reference graph.
///
/// Two evaluation nodes are equal iff they name the same object and their
/// keys are equal by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Node {
    Eval { obj: ObjectId, key: Key },
    Object(ObjectId),
    Reference(RefId),
}

impl Node {
    /// The evaluation node of `obj` at `key`.
    pub fn eval(obj: ObjectId, key: Key) -> Self {
        Node::Eval { obj, key }
    }

    /// Which variant this node is.
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Eval { .. } => NodeKind::Eval,
            Node::Object(_) => NodeKind::Object,
            Node::Reference(_) => NodeKind::Reference,
        }
    }

    /// The owning object, for evaluation and object-only nodes.
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            Node::Eval { obj, .. } | Node::Object(obj) => Some(*obj),
            Node::Reference(_) => None,
        }
    }

    /// The argument key, for evaluation nodes.
    pub fn key(&self) -> Option<&Key> {
        match self {
            Node::Eval { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Check if this is an evaluation node.
    pub fn is_eval(&self) -> bool {
        matches!(self, Node::Eval { .. })
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Eval { obj, key } => write!(f, "{obj}{key}"),
            Node::Object(obj) => write!(f, "{obj}"),
            Node::Reference(r) => write!(f, "{r}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    /// Handles past the u32 range must not wrap around to existing ones.
    #[test]
    #[cfg(target_pointer_width = "64")]
    #[should_panic(expected = "object arena exceeds u32::MAX entries")]
    fn object_handles_do_not_wrap() {
        ObjectId::from_index(u32::MAX as usize + 1);
    }

    #[test]
    fn largest_handles_round_trip() {
        let max = u32::MAX as usize;
        assert_eq!(ObjectId::from_index(max).index(), max);
        assert_eq!(RefId::from_index(max).raw(), u32::MAX);
    }

    #[test]
    fn eval_nodes_compare_by_object_and_key() {
        let a = ObjectId::from_index(0);
        let b = ObjectId::from_index(1);

        assert_eq!(Node::eval(a, key![1]), Node::eval(a, key![1]));
        assert_ne!(Node::eval(a, key![1]), Node::eval(a, key![2]));
        assert_ne!(Node::eval(a, key![1]), Node::eval(b, key![1]));
    }

    #[test]
    fn kinds_are_distinct() {
        let obj = ObjectId::from_index(3);
        assert_eq!(Node::eval(obj, key![]).kind(), NodeKind::Eval);
        assert_eq!(Node::Object(obj).kind(), NodeKind::Object);
        assert_eq!(Node::Reference(RefId::from_index(0)).kind(), NodeKind::Reference);
        assert_ne!(Node::eval(obj, key![]), Node::Object(obj));
    }

    #[test]
    fn object_accessor() {
        let obj = ObjectId::from_index(7);
        assert_eq!(Node::eval(obj, key![1]).object(), Some(obj));
        assert_eq!(Node::Object(obj).object(), Some(obj));
        assert_eq!(Node::Reference(RefId::from_index(7)).object(), None);
    }
}
