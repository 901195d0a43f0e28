//! Error types for netpilot.
//!
//! Every variant maps to one of the CLI exit codes so the operator sees the
//! same classification the core used internally.

use thiserror::Error;

/// Exit code for success
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for tool or runtime errors
pub const EXIT_RUNTIME_ERROR: i32 = 1;

/// Exit code when the operator rejected a mutating action (or it timed out)
pub const EXIT_REJECTED: i32 = 2;

/// Exit code for configuration and validation errors
pub const EXIT_CONFIG_ERROR: i32 = 3;

#[derive(Error, Debug)]
pub enum NetpilotError {
    #[error("Classification confidence too low ({confidence:.2} < {floor:.2})")]
    ClassificationLowConfidence { confidence: f64, floor: f64 },

    #[error("Tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    #[error("Schema violation for '{tool}': {}", .violations.join("; "))]
    SchemaViolation { tool: String, violations: Vec<String> },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Aborted by operator: {0}")]
    ApprovalRejected(String),

    #[error("Approval request {0} timed out and was treated as rejected")]
    ApprovalTimeout(String),

    #[error("No pending approval request: {0}")]
    ApprovalNotFound(String),

    #[error("Recursion limit exceeded (depth {0})")]
    RecursionLimitExceeded(u32),

    #[error("Iteration limit exceeded ({0} iterations)")]
    IterationLimitExceeded(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NetpilotError {
    /// CLI exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            NetpilotError::ApprovalRejected(_) | NetpilotError::ApprovalTimeout(_) => EXIT_REJECTED,
            NetpilotError::SchemaViolation { .. }
            | NetpilotError::UnknownTool(_)
            | NetpilotError::Config(_)
            | NetpilotError::Validation(_)
            | NetpilotError::Yaml(_) => EXIT_CONFIG_ERROR,
            NetpilotError::ClassificationLowConfidence { .. }
            | NetpilotError::ToolInvocation { .. }
            | NetpilotError::ToolTimeout { .. }
            | NetpilotError::ApprovalNotFound(_)
            | NetpilotError::RecursionLimitExceeded(_)
            | NetpilotError::IterationLimitExceeded(_)
            | NetpilotError::Session(_)
            | NetpilotError::Io(_)
            | NetpilotError::Json(_)
            | NetpilotError::Internal(_) => EXIT_RUNTIME_ERROR,
        }
    }

    /// Whether a read-only invocation that failed this way may be retried once
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetpilotError::ToolInvocation { .. } | NetpilotError::ToolTimeout { .. }
        )
    }

    pub fn tool(tool: &str, message: impl Into<String>) -> Self {
        NetpilotError::ToolInvocation {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetpilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(NetpilotError::ApprovalRejected("no".into()).exit_code(), EXIT_REJECTED);
        assert_eq!(NetpilotError::ApprovalTimeout("a1".into()).exit_code(), EXIT_REJECTED);
        assert_eq!(NetpilotError::Config("bad".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            NetpilotError::SchemaViolation {
                tool: "t".into(),
                violations: vec!["missing 'hostname'".into()]
            }
            .exit_code(),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(NetpilotError::tool("t", "boom").exit_code(), EXIT_RUNTIME_ERROR);
    }

    #[test]
    fn test_schema_violation_message_lists_all() {
        let err = NetpilotError::SchemaViolation {
            tool: "device_config_push".into(),
            violations: vec!["missing 'hostname'".into(), "unknown 'foo'".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("missing 'hostname'"));
        assert!(msg.contains("unknown 'foo'"));
    }

    #[test]
    fn test_retryable() {
        assert!(NetpilotError::tool("t", "x").is_retryable());
        assert!(NetpilotError::ToolTimeout { tool: "t".into(), timeout_ms: 10 }.is_retryable());
        assert!(!NetpilotError::UnknownTool("t".into()).is_retryable());
    }
}
