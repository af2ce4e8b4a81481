//! Errors
//!
//! Two layers of errors exist:
//!
//! - [`EvalError`] travels through formula code while the call stack unwinds.
//!   Formulas return it (usually via `?` on nested evaluations) and raise
//!   their own failures with [`EvalError::msg`] or [`EvalError::raised`].
//! - [`Error`] is what [`Model`](crate::Model) operations return. Failures
//!   during evaluation are wrapped into an [`ErrorReport`] built from the
//!   frames that were rolled back on the way out.

use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::graph::{Node, ObjectId, RefId};
use crate::value::Value;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised while a formula is being evaluated.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("maximum call depth of {limit} frames exceeded")]
    DepthExceeded { limit: usize },

    #[error("circular reference: {node} was requested while being evaluated")]
    Circular { node: Node },

    /// A formula's own failure.
    #[error(transparent)]
    Raised(Box<dyn StdError + Send + Sync>),

    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    #[error("unknown reference {0}")]
    UnknownReference(RefId),

    #[error("{name} takes {expected} argument(s) but {given} were given")]
    Arity {
        name: String,
        expected: usize,
        given: usize,
    },
}

impl EvalError {
    /// A formula failure carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        EvalError::Raised(message.into())
    }

    /// A formula failure wrapping another error.
    pub fn raised<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        EvalError::Raised(Box::new(err))
    }
}

/// What kind of failure an [`ErrorReport`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DeepReference,
    Circular,
    Formula,
}

/// One rolled-back frame of a failed evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct TraceFrame {
    pub node: Node,
    /// Display name of the node, e.g. `Space1.foo(t=3)`.
    pub name: String,
    /// Parameter bindings of the frame.
    pub locals: Vec<(String, Value)>,
    /// First line of the formula's source, if the object has source text.
    pub line: Option<String>,
}

/// Structured trace of a failed outermost evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Messages of the inner error's `source()` chain, outermost first.
    pub causes: Vec<String>,
    /// Rolled-back frames, outermost caller first.
    pub frames: Vec<TraceFrame>,
    /// Source text of the deepest failing frame.
    pub source: Option<String>,
    #[serde(skip)]
    max_lines: usize,
}

impl ErrorReport {
    pub(crate) fn new(
        kind: ErrorKind,
        err: &EvalError,
        frames: Vec<TraceFrame>,
        source: Option<String>,
        max_lines: usize,
    ) -> Self {
        let mut causes = Vec::new();
        let mut next = err.source();
        // `Raised` is transparent, so its first source is the wrapped
        // error's own cause
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }

        Self {
            kind,
            message: err.to_string(),
            causes,
            frames,
            source,
            max_lines,
        }
    }

    /// The deepest frame, where the failure originated.
    pub fn failing_frame(&self) -> Option<&TraceFrame> {
        self.frames.last()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn title(&self) -> &'static str {
        match self.kind {
            ErrorKind::DeepReference => "Formula call stack too deep",
            ErrorKind::Circular => "Circular reference in formula",
            ErrorKind::Formula => "Error in formula",
        }
    }

    fn write_frame(f: &mut fmt::Formatter<'_>, index: usize, frame: &TraceFrame) -> fmt::Result {
        writeln!(f, "{index}: {}", frame.name)?;
        if let Some(line) = &frame.line {
            writeln!(f, "    {}", line.trim())?;
        }
        Ok(())
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.title(), self.message)?;
        for cause in &self.causes {
            writeln!(f, "  caused by: {cause}")?;
        }

        if !self.frames.is_empty() {
            writeln!(f)?;
            writeln!(f, "Formula traceback:")?;
            let len = self.frames.len();
            if self.max_lines == 0 || len <= self.max_lines {
                for (i, frame) in self.frames.iter().enumerate() {
                    Self::write_frame(f, i, frame)?;
                }
            } else {
                let head = self.max_lines.div_ceil(2);
                let tail = self.max_lines - head;
                for (i, frame) in self.frames.iter().enumerate().take(head) {
                    Self::write_frame(f, i, frame)?;
                }
                writeln!(f, "...")?;
                for (i, frame) in self.frames.iter().enumerate().skip(len - tail) {
                    Self::write_frame(f, i, frame)?;
                }
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Formula source:")?;
            write!(f, "{}", source.trim_end())?;
        }
        Ok(())
    }
}

impl StdError for ErrorReport {}

/// Errors returned by model operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    DeepReference(Box<ErrorReport>),

    #[error("{0}")]
    Circular(Box<ErrorReport>),

    #[error("{0}")]
    Formula(Box<ErrorReport>),

    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    #[error("unknown reference {0}")]
    UnknownReference(RefId),

    #[error("{name} takes {expected} argument(s) but {given} were given")]
    Arity {
        name: String,
        expected: usize,
        given: usize,
    },

    #[error("{0} does not accept input values")]
    InputNotAccepted(String),

    #[error("recompute block size must be at least 1")]
    InvalidBlockSize,

    #[error("recompute subgraph has a cycle; {0} node(s) could not be ordered")]
    CyclicPlan(usize),

    #[error("invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// The error trace, for failures raised during evaluation.
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            Error::DeepReference(r) | Error::Circular(r) | Error::Formula(r) => Some(r),
            _ => None,
        }
    }
}

impl From<ErrorReport> for Error {
    fn from(report: ErrorReport) -> Self {
        match report.kind {
            ErrorKind::DeepReference => Error::DeepReference(Box::new(report)),
            ErrorKind::Circular => Error::Circular(Box::new(report)),
            ErrorKind::Formula => Error::Formula(Box::new(report)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    fn frame(i: usize) -> TraceFrame {
        TraceFrame {
            node: Node::eval(ObjectId::from_index(0), key![i as i64]),
            name: format!("foo(t={i})"),
            locals: vec![("t".to_string(), Value::from(i as i64))],
            line: None,
        }
    }

    #[test]
    fn msg_displays_message() {
        assert_eq!(EvalError::msg("bad input").to_string(), "bad input");
    }

    #[test]
    fn report_collects_cause_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = EvalError::raised(Outer(inner));
        let report = ErrorReport::new(ErrorKind::Formula, &err, vec![frame(0)], None, 6);
        assert_eq!(report.message, "outer failure");
        assert_eq!(report.causes, vec!["disk gone".to_string()]);
    }

    #[test]
    fn long_traces_are_truncated() {
        let frames = (0..10).map(frame).collect();
        let err = EvalError::msg("boom");
        let report = ErrorReport::new(ErrorKind::Formula, &err, frames, None, 4);
        let text = report.to_string();
        assert!(text.contains("0: foo(t=0)"));
        assert!(text.contains("1: foo(t=1)"));
        assert!(!text.contains("2: foo(t=2)"));
        assert!(text.contains("...\n"));
        assert!(text.contains("8: foo(t=8)"));
        assert!(text.contains("9: foo(t=9)"));
    }

    #[test]
    fn source_is_appended() {
        let err = EvalError::msg("boom");
        let report = ErrorReport::new(
            ErrorKind::Formula,
            &err,
            vec![frame(1)],
            Some("foo(t) = 1 / 0".to_string()),
            6,
        );
        assert!(report.to_string().ends_with("Formula source:\nfoo(t) = 1 / 0"));
    }

    #[test]
    fn report_converts_by_kind() {
        let err = EvalError::DepthExceeded { limit: 10 };
        let report = ErrorReport::new(ErrorKind::DeepReference, &err, vec![], None, 6);
        let error = Error::from(report);
        assert!(matches!(error, Error::DeepReference(_)));
        assert!(error.report().is_some());
    }
}
