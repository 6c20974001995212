//! Pipeline message envelopes for commands and queries.
//!
//! Events travel as [`nimbus_events::EventEnvelope`]; commands and queries
//! are wrapped here with the framework metadata the interceptors read and
//! write (correlation, deadline, trace).

use chrono::{DateTime, Utc};

use nimbus_core::{AggregateId, CorrelationId, TenantId, UserId};
use nimbus_events::{Command, HasTenant, TraceContext};

/// Framework metadata carried alongside a command or query payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    pub correlation_id: CorrelationId,
    /// Acting user, when the message originates from an authenticated
    /// request.
    pub user_id: Option<UserId>,
    /// Absolute deadline for the whole unit of work.
    pub deadline: Option<DateTime<Utc>>,
    /// Trace context to be inherited by downstream events.
    pub trace: Option<TraceContext>,
}

impl MessageMetadata {
    pub fn new() -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            user_id: None,
            deadline: None,
            trace: None,
        }
    }

    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::new()
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Messages whose framework metadata interceptors may read and update.
pub trait WithMetadata {
    fn metadata(&self) -> &MessageMetadata;
    fn metadata_mut(&mut self) -> &mut MessageMetadata;
}

/// A command plus its framework metadata.
#[derive(Debug, Clone)]
pub struct CommandMessage<C> {
    pub command: C,
    pub metadata: MessageMetadata,
}

impl<C> CommandMessage<C> {
    pub fn new(command: C) -> Self {
        Self {
            command,
            metadata: MessageMetadata::new(),
        }
    }

    pub fn with_metadata(command: C, metadata: MessageMetadata) -> Self {
        Self { command, metadata }
    }
}

impl<C: Command> CommandMessage<C> {
    pub fn aggregate_id(&self) -> AggregateId {
        self.command.aggregate_id()
    }
}

impl<C: HasTenant> HasTenant for CommandMessage<C> {
    fn tenant_id(&self) -> TenantId {
        self.command.tenant_id()
    }
}

impl<C> WithMetadata for CommandMessage<C> {
    fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut MessageMetadata {
        &mut self.metadata
    }
}

/// A query plus its framework metadata.
#[derive(Debug, Clone)]
pub struct QueryMessage<Q> {
    pub query: Q,
    pub metadata: MessageMetadata,
}

impl<Q> QueryMessage<Q> {
    pub fn new(query: Q) -> Self {
        Self {
            query,
            metadata: MessageMetadata::new(),
        }
    }

    pub fn with_metadata(query: Q, metadata: MessageMetadata) -> Self {
        Self { query, metadata }
    }
}

impl<Q: HasTenant> HasTenant for QueryMessage<Q> {
    fn tenant_id(&self) -> TenantId {
        self.query.tenant_id()
    }
}

impl<Q> WithMetadata for QueryMessage<Q> {
    fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut MessageMetadata {
        &mut self.metadata
    }
}
