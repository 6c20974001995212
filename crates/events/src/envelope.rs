use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nimbus_core::{AggregateId, TenantId};

use crate::metadata::EventMetadata;

/// Envelope for an event: the unit of transport on the event bus.
///
/// The envelope separates infrastructure concerns (stream identity, ordering,
/// tenant metadata) from the domain payload. `version` is the event's
/// position in the `(tenant, aggregate)` stream: monotonically increasing,
/// starting at 1.
///
/// The tenant lives in [`EventMetadata`]; consumers restore their context
/// from it and reject envelopes that carry none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    aggregate_id: AggregateId,
    aggregate_type: String,
    event_type: String,

    /// Position in the aggregate stream.
    version: u64,

    payload: E,
    metadata: EventMetadata,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        version: u64,
        payload: E,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            version,
            payload,
            metadata,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Tenant the event belongs to, when its metadata carries one.
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.metadata.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Re-wrap the envelope around a transformed payload, keeping all
    /// stream identity and metadata.
    pub fn map_payload<F, T>(self, f: F) -> EventEnvelope<T>
    where
        F: FnOnce(E) -> T,
    {
        EventEnvelope {
            event_id: self.event_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            event_type: self.event_type,
            version: self.version,
            payload: f(self.payload),
            metadata: self.metadata,
        }
    }
}
