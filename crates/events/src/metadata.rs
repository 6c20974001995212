//! Event metadata wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use nimbus_core::{CorrelationId, TenantId, UserId};

/// Infrastructure metadata attached to every event.
///
/// Wire format (camelCase JSON):
/// `{tenantId, userId, correlationId, timestamp, traceId?, spanId?, traceFlags?}`.
///
/// `tenant_id` is optional at emission time - system-level events with no
/// tenant are allowed to be written - but any event consumed by the event
/// chain is rejected when it is absent (fail closed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    pub correlation_id: CorrelationId,

    /// Emission time, ISO-8601 with at least millisecond resolution.
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_flags: Option<String>,
}

impl EventMetadata {
    /// Metadata for a tenant-scoped event.
    pub fn for_tenant(
        tenant_id: TenantId,
        user_id: Option<UserId>,
        correlation_id: CorrelationId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            user_id,
            correlation_id,
            timestamp,
            trace_id: None,
            span_id: None,
            trace_flags: None,
        }
    }

    /// Metadata for a system-level event with no tenant. The event chain
    /// will reject such events on consumption.
    pub fn system(correlation_id: CorrelationId, timestamp: DateTime<Utc>) -> Self {
        Self {
            tenant_id: None,
            user_id: None,
            correlation_id,
            timestamp,
            trace_id: None,
            span_id: None,
            trace_flags: None,
        }
    }

    /// The caller's trace context, when both required fields are present.
    pub fn trace(&self) -> Option<TraceContext> {
        match (&self.trace_id, &self.span_id) {
            (Some(trace_id), Some(span_id)) => Some(TraceContext {
                trace_id: trace_id.clone(),
                span_id: span_id.clone(),
                trace_flags: self.trace_flags.clone(),
            }),
            _ => None,
        }
    }

    /// Copy a trace context verbatim into the metadata. Flags are carried
    /// as-is; when the caller has none, none is recorded.
    pub fn with_trace(mut self, trace: &TraceContext) -> Self {
        self.trace_id = Some(trace.trace_id.clone());
        self.span_id = Some(trace.span_id.clone());
        self.trace_flags = trace.trace_flags.clone();
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraceContextError {
    #[error("trace id must be 32 lowercase hex characters")]
    InvalidTraceId,
    #[error("span id must be 16 lowercase hex characters")]
    InvalidSpanId,
    #[error("trace flags must be 2 lowercase hex characters")]
    InvalidTraceFlags,
}

/// W3C-style trace context carried through commands and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// 32 hex characters.
    pub trace_id: String,
    /// 16 hex characters.
    pub span_id: String,
    /// 2 hex characters; absent when the caller supplied none.
    pub trace_flags: Option<String>,
}

impl TraceContext {
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        trace_flags: Option<String>,
    ) -> Result<Self, TraceContextError> {
        let trace_id = trace_id.into();
        let span_id = span_id.into();

        if !is_lower_hex(&trace_id, 32) {
            return Err(TraceContextError::InvalidTraceId);
        }
        if !is_lower_hex(&span_id, 16) {
            return Err(TraceContextError::InvalidSpanId);
        }
        if let Some(flags) = &trace_flags {
            if !is_lower_hex(flags, 2) {
                return Err(TraceContextError::InvalidTraceFlags);
            }
        }

        Ok(Self {
            trace_id,
            span_id,
            trace_flags,
        })
    }
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
