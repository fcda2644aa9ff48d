//! Correlation context propagated across every unit of work.
//!
//! A context is created at the plan-level entry point and flows to every
//! spawned task. Children inherit the trace id and get a fresh span whose
//! parent is the caller's span. Over wire boundaries the context travels in
//! a fixed header set; missing inbound ids are regenerated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";
pub const HEADER_TRACE_ID: &str = "x-trace-id";
pub const HEADER_SPAN_ID: &str = "x-span-id";
pub const HEADER_PARENT_SPAN_ID: &str = "x-parent-span-id";
pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_SESSION_ID: &str = "x-session-id";

/// The tuple (correlationId, traceId, spanId, parentSpanId) plus optional
/// request/session ids carried over wire boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationContext {
    pub correlation_id: Uuid,
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub parent_span_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
}

impl CorrelationContext {
    /// Start a fresh root context: new correlation, trace, and span ids.
    pub fn root() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            parent_span_id: None,
            request_id: None,
            session_id: None,
        }
    }

    /// Derive a child context: same correlation and trace, fresh span, and
    /// the caller's span as parent.
    pub fn child(&self) -> Self {
        Self {
            correlation_id: self.correlation_id,
            trace_id: self.trace_id,
            span_id: Uuid::new_v4(),
            parent_span_id: Some(self.span_id),
            request_id: self.request_id,
            session_id: self.session_id,
        }
    }

    pub fn with_request_id(mut self, id: Uuid) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn with_session_id(mut self, id: Uuid) -> Self {
        self.session_id = Some(id);
        self
    }

    /// Serialize to the wire header set.
    pub fn to_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(HEADER_CORRELATION_ID.to_string(), self.correlation_id.to_string());
        headers.insert(HEADER_TRACE_ID.to_string(), self.trace_id.to_string());
        headers.insert(HEADER_SPAN_ID.to_string(), self.span_id.to_string());
        if let Some(parent) = self.parent_span_id {
            headers.insert(HEADER_PARENT_SPAN_ID.to_string(), parent.to_string());
        }
        if let Some(request) = self.request_id {
            headers.insert(HEADER_REQUEST_ID.to_string(), request.to_string());
        }
        if let Some(session) = self.session_id {
            headers.insert(HEADER_SESSION_ID.to_string(), session.to_string());
        }
        headers
    }

    /// Parse from inbound headers. Missing or malformed required ids are
    /// regenerated so the receiver always has a complete context.
    pub fn from_headers(headers: &HashMap<String, String>) -> Self {
        let parse = |key: &str| headers.get(key).and_then(|v| Uuid::parse_str(v).ok());

        Self {
            correlation_id: parse(HEADER_CORRELATION_ID).unwrap_or_else(Uuid::new_v4),
            trace_id: parse(HEADER_TRACE_ID).unwrap_or_else(Uuid::new_v4),
            span_id: parse(HEADER_SPAN_ID).unwrap_or_else(Uuid::new_v4),
            parent_span_id: parse(HEADER_PARENT_SPAN_ID),
            request_id: parse(HEADER_REQUEST_ID),
            session_id: parse(HEADER_SESSION_ID),
        }
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::root()
    }
}
