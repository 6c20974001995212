//! In-memory event and snapshot stores.
//!
//! Intended for tests/dev. Tenancy comes from the ambient context exactly as
//! in the Postgres backend, so isolation tests run against the same
//! contract.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use nimbus_core::{AggregateId, TenantId};
use nimbus_tenant::TenantContext;

use super::store::{
    EventStore, EventStoreError, Snapshot, SnapshotStore, StoredEvent, UncommittedEvent,
    stream_version, validate_batch,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: u64,
    ) -> Result<u64, EventStoreError> {
        let tenant_id = TenantContext::require()?;

        // Empty batch: no-op, no version movement.
        if events.is_empty() {
            return Ok(expected_version);
        }

        validate_batch(tenant_id, aggregate_id, &events)?;
        let aggregate_type = events[0].aggregate_type.clone();

        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        let stream = streams.entry(key).or_default();
        let current = stream_version(stream);

        if current != expected_version {
            return Err(EventStoreError::Conflict {
                expected: expected_version,
                actual: current,
            });
        }

        // Aggregate type is stable across a stream's lifetime.
        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let mut next = current + 1;
        for event in events {
            stream.push(StoredEvent {
                event_id: event.event_id,
                tenant_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                event_type: event.event_type,
                version: next,
                payload: event.payload,
                metadata: event.metadata,
                created_at: Utc::now(),
            });
            next += 1;
        }

        Ok(next - 1)
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let tenant_id = TenantContext::require()?;
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }

    async fn load_from(
        &self,
        aggregate_id: AggregateId,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let stream = self.load(aggregate_id).await?;
        Ok(stream
            .into_iter()
            .filter(|e| e.version >= from_version)
            .collect())
    }
}

/// In-memory snapshot cache, replace-by-`(tenant, aggregate)`.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<StreamKey, Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load_snapshot(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        let tenant_id = TenantContext::require()?;
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        Ok(snapshots
            .get(&StreamKey {
                tenant_id,
                aggregate_id,
            })
            .cloned())
    }

    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), EventStoreError> {
        let tenant_id = TenantContext::require()?;
        if snapshot.tenant_id != tenant_id {
            return Err(EventStoreError::TenantIsolation(
                "snapshot carries a foreign tenant".to_string(),
            ));
        }

        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        snapshots.insert(
            StreamKey {
                tenant_id,
                aggregate_id: snapshot.aggregate_id,
            },
            snapshot.clone(),
        );
        Ok(())
    }
}
