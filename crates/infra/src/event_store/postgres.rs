//! Postgres-backed event store.
//!
//! Tenant isolation is enforced three times over: the ambient tenant is
//! bound to the session variable before any statement (forced row-level
//! security reads it), every query also filters by `tenant_id` explicitly,
//! and an immutability trigger rejects `UPDATE`/`DELETE` on the events table
//! even for privileged sessions. See `migrations/0001_event_store.sql`.
//!
//! ## Error mapping
//!
//! | PostgreSQL error code | `EventStoreError` | Scenario |
//! |-----------------------|-------------------|----------|
//! | `23505` unique violation | `Conflict` | Concurrent append lost the race on `(tenant_id, aggregate_id, version)` |
//! | `23514` check violation | `InvalidAppend` | `version <= 0` or similar schema breach |
//! | other database errors | `Storage` | I/O, connectivity, schema drift |

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use nimbus_core::{AggregateId, TenantConfig, TenantId};
use nimbus_events::EventMetadata;
use nimbus_tenant::TenantContext;

use super::store::{
    EventStore, EventStoreError, Snapshot, SnapshotStore, StoredEvent, UncommittedEvent,
    validate_batch,
};
use crate::session::bind_tenant;

/// Postgres append-only event store.
///
/// Shareable across tasks; every operation runs in its own tenant-bound
/// transaction.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    session_variable: String,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool, config: &TenantConfig) -> Self {
        Self {
            pool,
            session_variable: config.session_variable.clone(),
        }
    }

    async fn begin_bound(
        &self,
        tenant_id: TenantId,
    ) -> Result<Transaction<'static, Postgres>, EventStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        bind_tenant(&mut tx, tenant_id, &self.session_variable)
            .await
            .map_err(|e| map_sqlx_error("bind_tenant", e))?;

        Ok(tx)
    }

    async fn current_version(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<u64, EventStoreError> {
        let mut tx = self.begin_bound(tenant_id).await?;
        let (version, _) = stream_head(&mut tx, tenant_id, aggregate_id).await?;
        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))?;
        Ok(version)
    }
}

#[async_trait::async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, events),
        fields(aggregate_id = %aggregate_id, event_count = events.len(), expected_version),
        err
    )]
    async fn append(
        &self,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: u64,
    ) -> Result<u64, EventStoreError> {
        let tenant_id = TenantContext::require()?;

        if events.is_empty() {
            return Ok(expected_version);
        }

        validate_batch(tenant_id, aggregate_id, &events)?;
        let aggregate_type = events[0].aggregate_type.clone();

        let mut tx = self.begin_bound(tenant_id).await?;

        let (current, existing_type) = stream_head(&mut tx, tenant_id, aggregate_id).await?;

        if let Some(existing) = existing_type {
            if existing != aggregate_type {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
                )));
            }
        }

        if current != expected_version {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::Conflict {
                expected: expected_version,
                actual: current,
            });
        }

        let mut next = current + 1;
        for event in &events {
            let metadata = serde_json::to_value(&event.metadata).map_err(|e| {
                EventStoreError::InvalidAppend(format!("metadata serialization failed: {e}"))
            })?;

            let insert = sqlx::query(
                r#"
                INSERT INTO eaf_events.events (
                    id,
                    aggregate_id,
                    aggregate_type,
                    event_type,
                    payload,
                    metadata,
                    tenant_id,
                    version
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id)
            .bind(aggregate_id.as_uuid())
            .bind(&aggregate_type)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(&metadata)
            .bind(tenant_id.as_uuid())
            .bind(next as i64)
            .execute(&mut *tx)
            .await;

            if let Err(err) = insert {
                let mapped = if is_unique_violation(&err) {
                    // Another writer committed between our head check and
                    // this insert; report the winner's version.
                    let actual = self
                        .current_version(tenant_id, aggregate_id)
                        .await
                        .unwrap_or(expected_version);
                    EventStoreError::Conflict {
                        expected: expected_version,
                        actual,
                    }
                } else {
                    map_sqlx_error("insert_event", err)
                };
                return Err(mapped);
            }

            next += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(next - 1)
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.load_from(aggregate_id, 1).await
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id, from_version), err)]
    async fn load_from(
        &self,
        aggregate_id: AggregateId,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let tenant_id = TenantContext::require()?;

        let mut tx = self.begin_bound(tenant_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT
                id,
                aggregate_id,
                aggregate_type,
                event_type,
                payload,
                metadata,
                tenant_id,
                version,
                created_at
            FROM eaf_events.events
            WHERE tenant_id = $1 AND aggregate_id = $2 AND version >= $3
            ORDER BY version ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .bind(from_version as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))?;

        rows.iter().map(stored_event_from_row).collect()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for PostgresEventStore {
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    async fn load_snapshot(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        let tenant_id = TenantContext::require()?;

        let mut tx = self.begin_bound(tenant_id).await?;

        let row = sqlx::query(
            r#"
            SELECT
                aggregate_id,
                aggregate_type,
                version,
                state,
                tenant_id,
                created_at
            FROM eaf_events.snapshots
            WHERE tenant_id = $1 AND aggregate_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_snapshot", e))?;

        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))?;

        row.map(|row| snapshot_from_row(&row)).transpose()
    }

    #[instrument(skip(self, snapshot), fields(aggregate_id = %snapshot.aggregate_id, version = snapshot.version), err)]
    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), EventStoreError> {
        let tenant_id = TenantContext::require()?;
        if snapshot.tenant_id != tenant_id {
            return Err(EventStoreError::TenantIsolation(
                "snapshot carries a foreign tenant".to_string(),
            ));
        }

        let mut tx = self.begin_bound(tenant_id).await?;

        sqlx::query(
            r#"
            INSERT INTO eaf_events.snapshots (
                aggregate_id,
                aggregate_type,
                version,
                state,
                tenant_id
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, aggregate_id)
            DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                state = EXCLUDED.state,
                created_at = NOW()
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version as i64)
        .bind(&snapshot.state)
        .bind(tenant_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("store_snapshot", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(())
    }
}

/// Current head of a stream: `(max version, aggregate_type)`, zero/None when
/// the stream does not exist for this tenant.
async fn stream_head(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(version), 0) AS current_version,
            MAX(aggregate_type) AS aggregate_type
        FROM eaf_events.events
        WHERE tenant_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("stream_head", e))?;

    let version: i64 = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Storage(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Storage(format!("failed to read aggregate_type: {e}")))?;

    Ok((version as u64, aggregate_type))
}

fn stored_event_from_row(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let read = |e: sqlx::Error| EventStoreError::Storage(format!("failed to read event row: {e}"));

    let metadata_value: serde_json::Value = row.try_get("metadata").map_err(read)?;
    let metadata: EventMetadata = serde_json::from_value(metadata_value)
        .map_err(|e| EventStoreError::Storage(format!("failed to decode event metadata: {e}")))?;

    let version: i64 = row.try_get("version").map_err(read)?;
    let tenant_id: uuid::Uuid = row.try_get("tenant_id").map_err(read)?;
    let aggregate_id: uuid::Uuid = row.try_get("aggregate_id").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;

    Ok(StoredEvent {
        event_id: row.try_get("id").map_err(read)?,
        tenant_id: TenantId::from_uuid(tenant_id),
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type: row.try_get("aggregate_type").map_err(read)?,
        event_type: row.try_get("event_type").map_err(read)?,
        version: version as u64,
        payload: row.try_get("payload").map_err(read)?,
        metadata,
        created_at,
    })
}

fn snapshot_from_row(row: &sqlx::postgres::PgRow) -> Result<Snapshot, EventStoreError> {
    let read =
        |e: sqlx::Error| EventStoreError::Storage(format!("failed to read snapshot row: {e}"));

    let version: i64 = row.try_get("version").map_err(read)?;
    let tenant_id: uuid::Uuid = row.try_get("tenant_id").map_err(read)?;
    let aggregate_id: uuid::Uuid = row.try_get("aggregate_id").map_err(read)?;

    Ok(Snapshot {
        tenant_id: TenantId::from_uuid(tenant_id),
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type: row.try_get("aggregate_type").map_err(read)?,
        version: version as u64,
        state: row.try_get("state").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                // Unique violations on the insert path are mapped to
                // `Conflict` by the caller, which knows the expected version.
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}
