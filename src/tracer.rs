/// Observation hooks fired at routing decision points
///
/// Tracers only observe; nothing they do changes where a statement goes.

use tracing::trace;

use crate::core::NodeRole;

/// A routing decision worth observing
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent<'a> {
    /// A sticky record was looked up
    ContextRead {
        context_id: &'a str,
        force_master: bool,
        preferred_replica: Option<&'a str>,
    },
    /// A sticky record was written
    ContextWrite {
        context_id: &'a str,
        forced_until: Option<u64>,
        last_role: NodeRole,
    },
    /// The statement was pinned to the primary
    StickToMaster {
        context_id: Option<&'a str>,
        by_statement: bool,
        by_context: bool,
        by_proxy: bool,
    },
    /// The pool that will serve the statement was picked
    AppropriatePool { role: NodeRole, candidates: usize },
    /// A node failed with a connectivity error and the next candidate is tried
    Failover { node: &'a str, error: &'a str },
}

impl TraceEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::ContextRead { .. } => "context_read",
            TraceEvent::ContextWrite { .. } => "context_write",
            TraceEvent::StickToMaster { .. } => "stick_to_master",
            TraceEvent::AppropriatePool { .. } => "appropriate_pool",
            TraceEvent::Failover { .. } => "failover",
        }
    }
}

pub trait Tracer: Send + Sync {
    fn fire(&self, event: &TraceEvent<'_>);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn fire(&self, _event: &TraceEvent<'_>) {}
}

/// Emits every event at `trace` level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn fire(&self, event: &TraceEvent<'_>) {
        trace!("[{}] {:?}", event.name(), event);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingTracer;
    use super::*;

    #[test]
    fn test_event_names() {
        let event = TraceEvent::AppropriatePool {
            role: NodeRole::Replica,
            candidates: 2,
        };
        assert_eq!(event.name(), "appropriate_pool");

        let event = TraceEvent::Failover {
            node: "replica-1",
            error: "closed connection",
        };
        assert_eq!(event.name(), "failover");
    }

    #[test]
    fn test_tracers_accept_events() {
        let event = TraceEvent::StickToMaster {
            context_id: Some("req-1"),
            by_statement: true,
            by_context: false,
            by_proxy: false,
        };
        NoopTracer.fire(&event);
        LogTracer.fire(&event);

        let recorder = RecordingTracer::default();
        recorder.fire(&event);
        recorder.fire(&event);
        assert_eq!(recorder.count("stick_to_master"), 2);
        assert_eq!(recorder.events().len(), 2);
    }
}
