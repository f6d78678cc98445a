/// Unified error handling for the ramal routing core
///
/// Connectivity failures are recovered locally by the router (blacklist and
/// fall through to the next candidate). Everything in this module is what is
/// left over once that recovery is exhausted or does not apply.

use std::fmt;
use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::context::ContextStoreError;
pub use crate::core::transport::TransportError;

/// Main error type for routing operations
#[derive(Debug, Error)]
pub enum RamalError {
    /// Semantic SQL failure reported by a node (syntax, constraint, ...)
    #[error("Statement error on {node}: {message}")]
    Statement { node: String, message: String },

    /// Every candidate for the resolved role failed with a connectivity error
    #[error("All nodes down after {} attempt(s), last error: {last}", .attempts.len())]
    AllNodesDown {
        attempts: Vec<NodeFailure>,
        last: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Sticky context store errors
    #[error("Context store error: {0}")]
    ContextStore(#[from] ContextStoreError),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// One connectivity failure observed while walking the candidate list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: String,
    pub message: String,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.message)
    }
}

/// Result type alias for ramal operations
pub type RamalResult<T> = Result<T, RamalError>;

impl RamalError {
    /// Create a statement error
    pub fn statement<N: Into<String>, S: Into<String>>(node: N, message: S) -> Self {
        RamalError::Statement {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create an exhaustion error from the failures collected during one call
    pub fn all_nodes_down(attempts: Vec<NodeFailure>) -> Self {
        let last = attempts
            .last()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "no candidates".to_string());
        RamalError::AllNodesDown { attempts, last }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        RamalError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (the caller may retry later)
    pub fn is_recoverable(&self) -> bool {
        match self {
            RamalError::AllNodesDown { .. } => true,
            RamalError::ContextStore(_) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RamalError::Config(_) => ErrorSeverity::Critical,
            RamalError::Internal { .. } => ErrorSeverity::Critical,
            RamalError::AllNodesDown { .. } => ErrorSeverity::Error,
            RamalError::Statement { .. } => ErrorSeverity::Info,
            RamalError::ContextStore(_) => ErrorSeverity::Warning,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_creation() {
        let error = RamalError::statement("primary", "syntax error at or near \"selec\"");
        assert!(matches!(error, RamalError::Statement { .. }));
        assert_eq!(
            error.to_string(),
            "Statement error on primary: syntax error at or near \"selec\""
        );
    }

    #[test]
    fn test_all_nodes_down_keeps_chain() {
        let error = RamalError::all_nodes_down(vec![
            NodeFailure {
                node: "replica-1".to_string(),
                message: "closed connection".to_string(),
            },
            NodeFailure {
                node: "primary".to_string(),
                message: "connection refused".to_string(),
            },
        ]);

        match &error {
            RamalError::AllNodesDown { attempts, last } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(last, "primary: connection refused");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            error.to_string(),
            "All nodes down after 2 attempt(s), last error: primary: connection refused"
        );
    }

    #[test]
    fn test_error_severity() {
        let config_error = RamalError::Config(ConfigError::ValidationError("test".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);

        let statement_error = RamalError::statement("primary", "duplicate key");
        assert_eq!(statement_error.severity(), ErrorSeverity::Info);
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARNING");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(RamalError::all_nodes_down(vec![]).is_recoverable());
        assert!(!RamalError::statement("primary", "duplicate key").is_recoverable());

        let config_error = RamalError::Config(ConfigError::ValidationError("test".to_string()));
        assert!(!config_error.is_recoverable());
    }
}
