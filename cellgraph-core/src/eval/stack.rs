//! Call Stack
//!
//! The call stack tracks which nodes are mid-evaluation. It is what lets the
//! executor record dependencies: when a frame completes, its value was read
//! by the frame below it.
//!
//! # Implementation
//!
//! Each frame remembers the index of the nearest frame below it whose object
//! is cached. Non-cached intermediate formulas are skipped over when edges
//! are recorded, so the trace graph only links cacheable nodes.
//!
//! Reference reads are buffered on the frame that made them and handed out
//! when the frame completes. A non-cached frame forwards its reads to the
//! frame below, so they land on the nearest cached ancestor.
//!
//! Frames are plain heap data; the stack never holds objects or values.

use std::collections::HashSet;

use indexmap::IndexSet;
use tracing::trace;

use crate::error::EvalError;
use crate::graph::{Node, RefId};

/// A node currently mid-evaluation.
#[derive(Debug, Clone)]
struct Frame {
    node: Node,
    /// Whether the frame's object memoizes its results.
    cached: bool,
    /// Index of the nearest cached frame below this one.
    cached_ancestor: Option<usize>,
    /// References read while this frame was on top, in read order.
    ref_reads: IndexSet<RefId>,
    /// Length of the rollback log when this frame was pushed.
    rollback_mark: usize,
}

/// A frame that completed normally.
#[derive(Debug)]
pub(crate) struct Popped {
    pub node: Node,
    pub cached: bool,
    /// The nearest cached frame still on the stack, which read this value.
    pub reader: Option<Node>,
    /// References read by this frame (cached frames only).
    pub ref_reads: IndexSet<RefId>,
}

#[derive(Debug, Default)]
pub(crate) struct CallStack {
    frames: Vec<Frame>,
    active: HashSet<Node>,
    max_depth: usize,
    /// Frames removed by failures, innermost first.
    rollback_log: Vec<Node>,
}

impl CallStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Start a fresh outermost evaluation.
    pub fn reset(&mut self, max_depth: usize) {
        debug_assert!(self.frames.is_empty(), "reset with frames on the stack");
        self.max_depth = max_depth;
        self.rollback_log.clear();
    }

    /// Is `node` somewhere on the stack right now?
    pub fn contains(&self, node: &Node) -> bool {
        self.active.contains(node)
    }

    /// Index of the nearest cached frame, counting the top frame itself.
    fn nearest_cached_index(&self) -> Option<usize> {
        let top = self.frames.len().checked_sub(1)?;
        if self.frames[top].cached {
            Some(top)
        } else {
            self.frames[top].cached_ancestor
        }
    }

    /// The node that is reading values right now, skipping non-cached frames.
    pub fn nearest_cached(&self) -> Option<&Node> {
        self.nearest_cached_index().map(|i| &self.frames[i].node)
    }

    /// Forget failures the top frame caught. Called whenever the top frame
    /// goes on to make another request, so that a later failure of the frame
    /// is traced to what it last asked for.
    pub fn settle_caught_failures(&mut self) {
        if let Some(top) = self.frames.last() {
            self.rollback_log.truncate(top.rollback_mark);
        }
    }

    /// Push `node` as the new top frame.
    ///
    /// Fails if the stack is full or `node` is already being evaluated.
    pub fn push(&mut self, node: Node, cached: bool) -> Result<(), EvalError> {
        self.settle_caught_failures();
        if self.frames.len() >= self.max_depth {
            return Err(EvalError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        if self.active.contains(&node) {
            return Err(EvalError::Circular { node });
        }

        let cached_ancestor = self.nearest_cached_index();
        trace!(%node, depth = self.frames.len(), "push");
        self.active.insert(node.clone());
        self.frames.push(Frame {
            node,
            cached,
            cached_ancestor,
            ref_reads: IndexSet::new(),
            rollback_mark: self.rollback_log.len(),
        });
        Ok(())
    }

    /// Remove the top frame after it completed normally.
    ///
    /// Failures that happened inside the frame and were handled by its
    /// formula are dropped from the rollback log.
    pub fn pop(&mut self) -> Popped {
        let frame = self.frames.pop().expect("pop on an empty call stack");
        self.active.remove(&frame.node);
        self.rollback_log.truncate(frame.rollback_mark);
        trace!(node = %frame.node, depth = self.frames.len(), "pop");

        let reader = frame
            .cached_ancestor
            .map(|i| self.frames[i].node.clone());

        let ref_reads = if frame.cached {
            frame.ref_reads
        } else {
            if let Some(below) = self.frames.last_mut() {
                below.ref_reads.extend(frame.ref_reads);
            }
            IndexSet::new()
        };

        Popped {
            node: frame.node,
            cached: frame.cached,
            reader,
            ref_reads,
        }
    }

    /// Remove the top frame because its formula failed.
    ///
    /// No dependency is recorded; buffered reference reads are discarded and
    /// the node is appended to the rollback log.
    pub fn rollback(&mut self) -> (Node, bool) {
        let frame = self.frames.pop().expect("rollback on an empty call stack");
        self.active.remove(&frame.node);
        trace!(node = %frame.node, depth = self.frames.len(), "rollback");
        self.rollback_log.push(frame.node.clone());
        (frame.node, frame.cached)
    }

    /// Log a reference read against the top frame.
    pub fn record_reference_read(&mut self, reference: RefId) {
        self.settle_caught_failures();
        if let Some(top) = self.frames.last_mut() {
            top.ref_reads.insert(reference);
        }
    }

    /// Nodes rolled back since the last reset, innermost first.
    pub fn rollback_log(&self) -> &[Node] {
        &self.rollback_log
    }

    pub fn take_rollback_log(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.rollback_log)
    }
}
