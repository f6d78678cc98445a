/// Core abstractions: roles, nodes, the transport seam and the connection pool
pub mod node;
pub mod pool;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use node::{Node, NodeSnapshot};
pub use pool::{ConnectionPool, Outcome, Target};
pub use transport::{QueryResult, SqlValue, Transport, TransportError, TransportFactory};

/// Role a physical connection plays behind the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// The single writable connection
    Primary,
    /// Read-only connection kept in sync with the primary, possibly lagging
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Replica => write!(f, "replica"),
        }
    }
}

/// Health state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Up,
    Blacklisted,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Up => write!(f, "up"),
            NodeState::Blacklisted => write!(f, "blacklisted"),
        }
    }
}
