//! Tenant propagation interceptors.
//!
//! `TenantEnrich` serves the command and query chains: the tenant comes from
//! the message payload (background dispatch has no ambient context, so the
//! payload is the only common ground) and is cross-checked against any
//! already-active context. `TenantRestore` serves the event chain: the
//! tenant comes from event metadata, and missing metadata is a hard denial.
//!
//! Both guarantee the pop on every exit path: guard drop inside an existing
//! scope, scope teardown otherwise.

use async_trait::async_trait;

use nimbus_events::{EventEnvelope, HasTenant};
use nimbus_observability::metrics;
use nimbus_tenant::{ContextError, TenantContext};

use crate::error::DispatchError;
use crate::pipeline::{Handler, Interceptor};

/// Pushes the payload tenant for the duration of the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantEnrich;

#[async_trait]
impl<M, R> Interceptor<M, R> for TenantEnrich
where
    M: HasTenant + Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str {
        "tenant_enrich"
    }

    async fn around(&self, message: M, next: &dyn Handler<M, R>) -> Result<R, DispatchError> {
        let tenant_id = message.tenant_id();
        if tenant_id.is_nil() {
            metrics::incr("tenant.enrich.rejected", "blank");
            return Err(DispatchError::access_denied("blank tenant in payload"));
        }

        // The payload-supplied tenant must agree with any active context.
        if let Some(active) = TenantContext::current() {
            if active != tenant_id {
                metrics::incr("tenant.enrich.rejected", "mismatch");
                tracing::warn!(
                    payload_tenant = %tenant_id,
                    active_tenant = %active,
                    "payload tenant differs from active context"
                );
                return Err(DispatchError::access_denied(
                    "payload tenant differs from active context",
                ));
            }
        }

        metrics::incr("tenant.enrich.applied", "");

        if TenantContext::in_scope() {
            let _guard = TenantContext::push(tenant_id).map_err(context_denied)?;
            next.handle(message).await
        } else {
            // Background dispatch: establish a scope of our own.
            TenantContext::with_tenant(tenant_id, next.handle(message))
                .await
                .map_err(context_denied)?
        }
    }
}

/// Restores the tenant from event metadata before the updater runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantRestore;

#[async_trait]
impl<E, R> Interceptor<EventEnvelope<E>, R> for TenantRestore
where
    E: Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str {
        "tenant_restore"
    }

    async fn around(
        &self,
        envelope: EventEnvelope<E>,
        next: &dyn Handler<EventEnvelope<E>, R>,
    ) -> Result<R, DispatchError> {
        let Some(tenant_id) = envelope.tenant_id() else {
            metrics::incr("tenant.restore.rejected", "missing");
            tracing::warn!(
                event_type = envelope.event_type(),
                "event metadata carries no tenant"
            );
            return Err(DispatchError::access_denied("event metadata has no tenant"));
        };
        if tenant_id.is_nil() {
            metrics::incr("tenant.restore.rejected", "blank");
            return Err(DispatchError::access_denied("event metadata tenant is blank"));
        }

        metrics::incr("tenant.restore.applied", "");

        // Fresh scope per delivery: pooled workers never inherit context,
        // and the pop happens even when the updater fails.
        TenantContext::with_tenant(tenant_id, next.handle(envelope))
            .await
            .map_err(context_denied)?
    }
}

fn context_denied(err: ContextError) -> DispatchError {
    DispatchError::access_denied(format!("tenant context rejected: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use nimbus_core::{AggregateId, CorrelationId, TenantId};
    use nimbus_events::{Command, EventMetadata};

    use crate::message::CommandMessage;
    use crate::pipeline::Pipeline;

    fn tenant(n: u128) -> TenantId {
        TenantId::from_uuid(uuid::Uuid::from_u128(n))
    }

    #[derive(Debug, Clone)]
    struct Probe {
        tenant_id: TenantId,
    }

    impl HasTenant for Probe {
        fn tenant_id(&self) -> TenantId {
            self.tenant_id
        }
    }

    impl Command for Probe {
        fn aggregate_id(&self) -> AggregateId {
            AggregateId::from_uuid(uuid::Uuid::from_u128(500))
        }
    }

    fn enrich_pipeline() -> Pipeline<CommandMessage<Probe>, Option<TenantId>> {
        Pipeline::new(
            Arc::new(|_msg: CommandMessage<Probe>| async move {
                Ok::<Option<TenantId>, DispatchError>(TenantContext::current())
            }),
            vec![Arc::new(TenantEnrich)],
        )
    }

    #[tokio::test]
    async fn enrich_pushes_payload_tenant_without_ambient_scope() {
        let pipeline = enrich_pipeline();
        let seen = pipeline
            .dispatch(CommandMessage::new(Probe { tenant_id: tenant(1) }))
            .await
            .unwrap();
        assert_eq!(seen, Some(tenant(1)));
        assert_eq!(TenantContext::current(), None);
    }

    #[tokio::test]
    async fn enrich_pushes_inside_existing_scope_and_pops() {
        let pipeline = enrich_pipeline();
        TenantContext::scope(async {
            let _outer = TenantContext::push(tenant(1)).unwrap();

            let seen = pipeline
                .dispatch(CommandMessage::new(Probe { tenant_id: tenant(1) }))
                .await
                .unwrap();
            assert_eq!(seen, Some(tenant(1)));

            // Unwind restored the outer depth.
            assert_eq!(TenantContext::depth(), 1);
        })
        .await;
    }

    #[tokio::test]
    async fn enrich_rejects_cross_tenant_mismatch() {
        let pipeline = enrich_pipeline();
        TenantContext::scope(async {
            let _outer = TenantContext::push(tenant(1)).unwrap();
            let err = pipeline
                .dispatch(CommandMessage::new(Probe { tenant_id: tenant(2) }))
                .await
                .unwrap_err();
            assert!(err.is_denial());
        })
        .await;
    }

    #[tokio::test]
    async fn enrich_rejects_nil_tenant() {
        let pipeline = enrich_pipeline();
        let err = pipeline
            .dispatch(CommandMessage::new(Probe {
                tenant_id: TenantId::from_uuid(uuid::Uuid::nil()),
            }))
            .await
            .unwrap_err();
        assert!(err.is_denial());
    }

    fn envelope(meta: EventMetadata) -> EventEnvelope<serde_json::Value> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            AggregateId::from_uuid(uuid::Uuid::from_u128(9)),
            "test.aggregate",
            "test.aggregate.touched",
            1,
            serde_json::json!({}),
            meta,
        )
    }

    fn restore_pipeline() -> Pipeline<EventEnvelope<serde_json::Value>, Option<TenantId>> {
        Pipeline::new(
            Arc::new(|_env: EventEnvelope<serde_json::Value>| async move {
                Ok::<Option<TenantId>, DispatchError>(TenantContext::current())
            }),
            vec![Arc::new(TenantRestore)],
        )
    }

    #[tokio::test]
    async fn restore_populates_context_during_handler_only() {
        let pipeline = restore_pipeline();

        assert_eq!(TenantContext::current(), None);
        let seen = pipeline
            .dispatch(envelope(EventMetadata::for_tenant(
                tenant(5),
                None,
                CorrelationId::new(),
                Utc::now(),
            )))
            .await
            .unwrap();
        assert_eq!(seen, Some(tenant(5)));
        assert_eq!(TenantContext::current(), None);
    }

    #[tokio::test]
    async fn restore_rejects_missing_tenant_before_handler() {
        let handler_ran = Arc::new(std::sync::Mutex::new(false));
        let ran = handler_ran.clone();
        let pipeline: Pipeline<EventEnvelope<serde_json::Value>, ()> = Pipeline::new(
            Arc::new(move |_env: EventEnvelope<serde_json::Value>| {
                let ran = ran.clone();
                async move {
                    *ran.lock().unwrap() = true;
                    Ok::<(), DispatchError>(())
                }
            }),
            vec![Arc::new(TenantRestore)],
        );

        let err = pipeline
            .dispatch(envelope(EventMetadata::system(CorrelationId::new(), Utc::now())))
            .await
            .unwrap_err();
        assert!(err.is_denial());
        assert!(!*handler_ran.lock().unwrap());
    }
}
