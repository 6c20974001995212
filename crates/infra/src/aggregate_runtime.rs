//! Aggregate execution pipeline (C7).
//!
//! Flow per command: load history → rehydrate by folding `apply` → decide
//! via the domain handler → append under the expected version → publish the
//! committed events. The runtime takes no locks and never retries; a
//! concurrency conflict is surfaced to the dispatcher and the caller picks
//! the policy.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use nimbus_core::{Aggregate, AggregateId, DomainError, TenantId};
use nimbus_dispatch::{CommandMessage, DispatchError, current_trace};
use nimbus_events::{Command, Event, EventBus, EventEnvelope, EventMetadata, HasTenant};
use nimbus_tenant::TenantContext;

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Conflict { expected, actual } => {
                DispatchError::Concurrency { expected, actual }
            }
            EventStoreError::MissingTenant(err) => DispatchError::MissingTenant(err),
            EventStoreError::TenantIsolation(reason) => DispatchError::access_denied(reason),
            EventStoreError::InvalidAppend(msg) | EventStoreError::Storage(msg) => {
                DispatchError::Storage(msg)
            }
        }
    }
}

/// Reusable load-apply-append engine over an event store and a bus.
///
/// - Aggregates must be deterministic over their event history.
/// - Events are appended first; publication happens only after a successful
///   append (at-least-once: a publish retry may duplicate, consumers are
///   idempotent).
#[derive(Debug)]
pub struct AggregateRuntime<S, B> {
    store: S,
    bus: B,
}

impl<S, B> AggregateRuntime<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> AggregateRuntime<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Execute one command against its aggregate.
    ///
    /// `make_aggregate` creates the zero-state instance; a creation command
    /// decides the first event (version 1) against it, any other command
    /// sees the folded history. Returns the new stream version (unchanged
    /// when the handler decided nothing).
    pub async fn execute<A>(
        &self,
        message: &CommandMessage<A::Command>,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<u64, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        // Fail closed: no ambient tenant, no storage access.
        let tenant_id = TenantContext::require()?;
        if message.command.tenant_id() != tenant_id {
            return Err(DispatchError::access_denied(
                "command tenant differs from active context",
            ));
        }

        let aggregate_id = message.command.aggregate_id();

        // 1) Load history (tenant-scoped).
        let history = self.store.load(aggregate_id).await?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected_version = history.last().map(|e| e.version).unwrap_or(0);

        // 2) Rehydrate.
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide (pure, no mutation).
        let decided = aggregate
            .handle(&message.command)
            .map_err(DispatchError::Domain)?;
        if decided.is_empty() {
            return Ok(expected_version);
        }

        // 4) Persist under the expected version.
        let metadata = outgoing_metadata(message);
        let uncommitted = decided
            .iter()
            .map(|event| {
                UncommittedEvent::from_typed(
                    aggregate_id,
                    A::AGGREGATE_TYPE,
                    Uuid::now_v7(),
                    event,
                    metadata.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let new_version = self
            .store
            .append(aggregate_id, uncommitted.clone(), expected_version)
            .await?;

        // 5) Publish the committed events with their assigned versions.
        let mut version = expected_version;
        for event in uncommitted {
            version += 1;
            let envelope = EventEnvelope::new(
                event.event_id,
                event.aggregate_id,
                event.aggregate_type,
                event.event_type,
                version,
                event.payload,
                event.metadata,
            );
            self.bus
                .publish(envelope)
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(new_version)
    }
}

/// Metadata for events decided by this command (§ correlation data
/// provider): tenant from the ambient context when present, user and
/// correlation from the message, trace from the message or the ambient
/// trace - flags verbatim, never invented.
fn outgoing_metadata<C>(message: &CommandMessage<C>) -> EventMetadata {
    let mut metadata = EventMetadata {
        tenant_id: TenantContext::current(),
        user_id: message.metadata.user_id,
        correlation_id: message.metadata.correlation_id,
        timestamp: chrono::Utc::now(),
        trace_id: None,
        span_id: None,
        trace_flags: None,
    };

    if let Some(trace) = message.metadata.trace.clone().or_else(current_trace) {
        metadata = metadata.with_trace(&trace);
    }

    metadata
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Isolation holds even against a buggy backend, and the stream must be
    // strictly increasing by version.
    let mut last = 0u64;
    for (idx, event) in stream.iter().enumerate() {
        if event.tenant_id != tenant_id {
            return Err(DispatchError::access_denied(format!(
                "loaded stream contains wrong tenant at index {idx}"
            )));
        }
        if event.aggregate_id != aggregate_id {
            return Err(DispatchError::access_denied(format!(
                "loaded stream contains wrong aggregate at index {idx}"
            )));
        }
        if event.version == 0 || event.version <= last {
            return Err(DispatchError::Storage(format!(
                "non-monotonic version in loaded stream (last={last}, found={})",
                event.version
            )));
        }
        last = event.version;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        // Unknown or reshaped event types surface here; `apply` itself is
        // total over the aggregate's own event enum.
        let event: A::Event = serde_json::from_value(stored.payload.clone()).map_err(|e| {
            DispatchError::Deserialize(format!(
                "event '{}' v{}: {e}",
                stored.event_type, stored.version
            ))
        })?;
        aggregate.apply(&event);
    }
    Ok(())
}
