//! Correlation and tracing context for orchestration sessions.
//!
//! Every session gets one trace; every phase of it (authorization, action,
//! confirmation waits) gets a span inside that trace. The correlation id is
//! what operators grep for when a marketplace ticket names a session.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orchestrator::session::Phase;

/// Correlation ID joining one session's log lines across components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Correlation id derived from a session id, so logs join on either.
    pub fn for_session(session_id: Uuid) -> Self {
        Self(session_id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Trace context threaded through one orchestration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceContext {
    /// Trace identifier shared by every span of the session.
    pub trace_id: String,

    /// Span identifier for the current operation.
    pub span_id: String,

    /// Correlation ID for request tracking.
    pub correlation_id: CorrelationId,

    /// Parent span, if this span was opened inside another.
    pub parent_span_id: Option<String>,

    /// Operation name, e.g. `session.authorization`.
    pub operation: String,

    /// Creation timestamp (Unix epoch seconds).
    pub timestamp: i64,
}

impl TraceContext {
    /// Root context for a freshly opened session.
    pub fn for_session(session_id: Uuid) -> Self {
        Self {
            trace_id: session_id.to_string(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id: CorrelationId::for_session(session_id),
            parent_span_id: None,
            operation: "session".to_string(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Child span inside the same trace.
    pub fn child_span(&self, operation: &str) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id: self.correlation_id.clone(),
            parent_span_id: Some(self.span_id.clone()),
            operation: operation.to_string(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Span covering one ledger phase of the session.
    pub fn phase_span(&self, phase: Phase) -> Self {
        let operation = match phase {
            Phase::Authorization => "session.authorization",
            Phase::Action => "session.action",
        };
        self.child_span(operation)
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_tracks_session() {
        let session = Uuid::new_v4();
        let id = CorrelationId::for_session(session);
        assert_eq!(id.as_str(), session.to_string());
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn test_child_span_stays_in_trace() {
        let session = Uuid::new_v4();
        let root = TraceContext::for_session(session);
        let child = root.child_span("gate.check");

        assert_eq!(child.trace_id, root.trace_id);
        assert_ne!(child.span_id, root.span_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id()));
        assert_eq!(child.correlation_id, root.correlation_id);
        assert_eq!(child.operation, "gate.check");
    }

    #[test]
    fn test_phase_spans_are_named_by_phase() {
        let root = TraceContext::for_session(Uuid::new_v4());
        assert_eq!(
            root.phase_span(Phase::Authorization).operation,
            "session.authorization"
        );
        assert_eq!(root.phase_span(Phase::Action).operation, "session.action");
    }
}
