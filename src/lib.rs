/// Ramal - read/write-splitting core for primary/replica database setups
///
/// Statements are classified, routed to the primary or a healthy replica, and
/// failed over when a connection drops. Contexts that just wrote are pinned to
/// the primary for a short window so they never read stale replica data.
///
/// The wire protocol is not part of this crate: hosts plug their driver in
/// through [`Transport`] and [`TransportFactory`].
pub mod classify;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod health;
pub mod router;
pub mod tracer;
pub mod utils;

pub use crate::classify::{classify, StatementClassification, StatementClassifier, StatementRole};
pub use crate::config::Config;
pub use crate::context::{ContextStore, StickyContext};
pub use crate::core::{
    ConnectionPool, Node, NodeRole, QueryResult, SqlValue, Transport, TransportError,
    TransportFactory,
};
pub use crate::error::{RamalError, RamalResult};
pub use crate::health::HealthReport;
pub use crate::router::Router;
pub use crate::tracer::{LogTracer, NoopTracer, TraceEvent, Tracer};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_shared_types_are_send_sync() {
        assert_send_sync::<Router>();
        assert_send_sync::<ConnectionPool>();
        assert_send_sync::<StickyContext>();
    }

    #[test]
    fn test_top_level_classify() {
        assert_eq!(classify("SELECT 1").role, StatementRole::Read);
        assert!(classify("UPDATE t SET a = 1").forces_master);
    }
}
