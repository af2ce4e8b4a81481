//! Engine Configuration

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How the outermost evaluation is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run formulas on the calling thread. Recursion depth is bounded by the
    /// caller's native stack.
    Direct,

    /// Run the outermost evaluation on a dedicated thread with
    /// `deep_stack_size` bytes of stack, blocking until it finishes.
    Deep,
}

/// What to do when an outermost evaluation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Return the error to the caller.
    Raise,

    /// Log the error, keep it as the model's last error, and return
    /// [`Value::Null`](crate::Value::Null).
    Report,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of frames on the call stack.
    pub max_depth: usize,
    pub execution_mode: ExecutionMode,
    /// Stack size in bytes for [`ExecutionMode::Deep`].
    pub deep_stack_size: usize,
    pub error_policy: ErrorPolicy,
    /// Frames shown in an error trace before the middle is elided.
    pub max_trace_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 65_000,
            execution_mode: ExecutionMode::Deep,
            deep_stack_size: 512 * 1024 * 1024,
            error_policy: ErrorPolicy::Raise,
            max_trace_lines: 6,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_deep_stack_size(mut self, bytes: usize) -> Self {
        self.deep_stack_size = bytes;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_max_trace_lines(mut self, lines: usize) -> Self {
        self.max_trace_lines = lines;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"max_depth": 100, "execution_mode": "direct"}"#)
            .unwrap();
        assert_eq!(config.max_depth, 100);
        assert_eq!(config.execution_mode, ExecutionMode::Direct);
        assert_eq!(config.error_policy, ErrorPolicy::Raise);
        assert_eq!(config.max_trace_lines, 6);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        let err = EngineConfig::from_json(r#"{"error_policy": "ignore"}"#).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn builder_sets_fields() {
        let config = EngineConfig::new()
            .with_max_depth(10)
            .with_error_policy(ErrorPolicy::Report);
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.error_policy, ErrorPolicy::Report);
    }
}
