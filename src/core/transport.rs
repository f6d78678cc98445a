/// Transport seam between the routing core and a concrete database driver
///
/// The wire protocol lives outside this crate. A host wires in its driver by
/// implementing [`Transport`] for one physical connection and, when building
/// from configuration, a [`TransportFactory`] that opens one per node.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::NodeConfig;

/// Parameter / cell value passed through to the driver untouched
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(s) => write!(f, "'{}'", s),
            SqlValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

/// Outcome of a successful statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    pub rows_affected: u64,
}

impl QueryResult {
    /// Result for statements that only report an affected-row count
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Failure reported by a transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection itself is unusable (refused, closed, timed out)
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// The database rejected the statement; the connection is fine
    #[error("statement failure: {0}")]
    Statement(String),
}

impl TransportError {
    pub fn connectivity<S: Into<String>>(message: S) -> Self {
        TransportError::Connectivity(message.into())
    }

    pub fn statement<S: Into<String>>(message: S) -> Self {
        TransportError::Statement(message.into())
    }

    /// Whether this failure should count against node health
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TransportError::Connectivity(_))
    }

    pub fn message(&self) -> &str {
        match self {
            TransportError::Connectivity(m) | TransportError::Statement(m) => m,
        }
    }
}

/// One physical database connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a statement
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, TransportError>;

    /// Re-establish the underlying connection, returning whether it worked
    async fn reconnect(&self) -> bool;

    /// Whether the connection currently looks usable
    async fn is_connected(&self) -> bool;
}

/// Builds transports from node descriptors
pub trait TransportFactory: Send + Sync {
    fn connect(&self, node: &NodeConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

impl<F> TransportFactory for F
where
    F: Fn(&NodeConfig) -> Result<Arc<dyn Transport>, TransportError> + Send + Sync,
{
    fn connect(&self, node: &NodeConfig) -> Result<Arc<dyn Transport>, TransportError> {
        self(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_kinds() {
        let err = TransportError::connectivity("closed connection");
        assert!(err.is_connectivity());
        assert_eq!(err.to_string(), "connectivity failure: closed connection");

        let err = TransportError::statement("syntax error");
        assert!(!err.is_connectivity());
        assert_eq!(err.message(), "syntax error");
    }

    #[test]
    fn test_sql_value_display() {
        assert_eq!(SqlValue::from("x").to_string(), "'x'");
        assert_eq!(SqlValue::from(7i64).to_string(), "7");
        assert_eq!(SqlValue::Null.to_string(), "NULL");
        assert_eq!(SqlValue::Bytes(vec![1, 2, 3]).to_string(), "<3 bytes>");
    }

    #[test]
    fn test_query_result_helpers() {
        let result = QueryResult::affected(3);
        assert_eq!(result.rows_affected, 3);
        assert!(result.is_empty());
    }
}
