/// Health reporting for pool nodes
use crate::core::NodeRole;
use std::fmt;
use std::time::Duration;

use crate::utils::format_duration;

/// Health status of a node, as seen by the last verification pass
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
    /// Still cooling down, not probed
    Blacklisted { remaining: Duration },
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Unhealthy { reason } => write!(f, "Unhealthy: {}", reason),
            HealthStatus::Blacklisted { remaining } => {
                write!(f, "Blacklisted ({} left)", format_duration(*remaining))
            }
        }
    }
}

impl HealthStatus {
    /// Check if the status represents a healthy node
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health of one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHealth {
    pub id: String,
    pub role: NodeRole,
    pub status: HealthStatus,
}

/// Result of probing every node in the pool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    pub nodes: Vec<NodeHealth>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_healthy())
    }

    pub fn any_healthy(&self) -> bool {
        self.nodes.iter().any(|n| n.status.is_healthy())
    }

    pub fn healthy_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.status.is_healthy()).count()
    }

    pub fn status_of(&self, id: &str) -> Option<&HealthStatus> {
        self.nodes.iter().find(|n| n.id == id).map(|n| &n.status)
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            writeln!(f, "{} ({}): {}", node.id, node.role, node.status)?;
        }
        Ok(())
    }
}
