//! Append-only, tenant-scoped event store contract.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use nimbus_core::{AggregateId, TenantId};
use nimbus_events::{Event, EventEnvelope, EventMetadata};
use nimbus_tenant::MissingTenantContext;

/// An event ready to be appended to a stream (not yet assigned a version).
///
/// The tenant travels in `metadata`; the store requires it to equal the
/// ambient `TenantContext` tenant for every event in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub metadata: EventMetadata,
}

impl UncommittedEvent {
    /// Build an uncommitted event from a typed domain event.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
        metadata: EventMetadata,
    ) -> Result<Self, EventStoreError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            payload,
            metadata,
        })
    }
}

/// A stored event: assigned a version and a server timestamp, tagged with
/// the promoted tenant column (always equal to `metadata.tenant_id`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,

    /// Position in the `(tenant, aggregate)` stream; starts at 1.
    pub version: u64,

    pub payload: JsonValue,
    pub metadata: EventMetadata,
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Convert into an envelope for publication on the event bus.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.event_type.clone(),
            self.version,
            self.payload.clone(),
            self.metadata.clone(),
        )
    }
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Stored max version differed from the caller's expectation; nothing
    /// was written.
    #[error("concurrency conflict: expected version {expected}, actual {actual}")]
    Conflict { expected: u64, actual: u64 },

    /// Storage access without an active tenant is forbidden.
    #[error(transparent)]
    MissingTenant(#[from] MissingTenantContext),

    /// Cross-tenant data reached the store boundary.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Batch shape violation (mixed aggregates, type instability, bad
    /// payload).
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// Backend I/O or schema failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Append-only, tenant-scoped event store.
///
/// The acting tenant is taken from the ambient `TenantContext` (fail-closed:
/// no tenant, no storage access). Implementations must:
/// - enforce tenant isolation on read and write
/// - enforce optimistic concurrency against the current stream version
/// - assign consecutive versions starting at `expected_version + 1`
/// - never mutate or delete stored events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `events` and return the new stream version. An empty batch is
    /// a no-op returning `expected_version`.
    async fn append(
        &self,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: u64,
    ) -> Result<u64, EventStoreError>;

    /// Full stream for the current tenant, ascending by version. Empty when
    /// the aggregate has no events under this tenant.
    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Stream suffix with `version >= from_version`.
    async fn load_from(
        &self,
        aggregate_id: AggregateId,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(
        &self,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: u64,
    ) -> Result<u64, EventStoreError> {
        (**self).append(aggregate_id, events, expected_version).await
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load(aggregate_id).await
    }

    async fn load_from(
        &self,
        aggregate_id: AggregateId,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_from(aggregate_id, from_version).await
    }
}

/// Aggregate state cache. Never a source of truth: the runtime can always
/// rebuild from the event log, and losing a snapshot loses nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub version: u64,
    pub state: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Snapshot cache with the same tenancy rules as the event store; writes
/// replace by `(tenant, aggregate)`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_snapshot(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<Snapshot>, EventStoreError>;

    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), EventStoreError>;
}

/// Shared batch preconditions: one tenant (the ambient one), one aggregate,
/// one aggregate type.
pub(crate) fn validate_batch(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    events: &[UncommittedEvent],
) -> Result<(), EventStoreError> {
    let aggregate_type = &events[0].aggregate_type;

    for (idx, event) in events.iter().enumerate() {
        match event.metadata.tenant_id {
            Some(event_tenant) if event_tenant == tenant_id => {}
            Some(_) => {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch event {idx} carries a foreign tenant"
                )));
            }
            None => {
                return Err(EventStoreError::TenantIsolation(format!(
                    "batch event {idx} carries no tenant metadata"
                )));
            }
        }
        if event.aggregate_id != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if event.aggregate_type != *aggregate_type {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
    }
    Ok(())
}

pub(crate) fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.version).unwrap_or(0)
}
