//! Standard chain assembly for the three message kinds.
//!
//! Interceptor order is fixed per kind (unwind runs in the opposite order):
//!
//! - command: deadline → tenant enrich → tracing inject → metrics → handler
//! - query:   deadline → tenant enrich → session bind → metrics → handler
//! - event:   tenant restore → rate limit → tracing restore → metrics → handler

use std::sync::Arc;

use nimbus_events::{Command, EventEnvelope, Query};

use crate::deadline::DeadlineGate;
use crate::message::{CommandMessage, QueryMessage};
use crate::metrics::{MetricsInterceptor, short_type_name};
use crate::pipeline::{Handler, Pipeline};
use crate::rate_limit::{RateLimit, RateLimiter};
use crate::session::{SessionBind, SessionBinder};
use crate::tenant::{TenantEnrich, TenantRestore};
use crate::trace::{TracingInject, TracingRestore};

/// The standard command chain around `handler`.
pub fn command_pipeline<C, R>(
    handler: Arc<dyn Handler<CommandMessage<C>, R>>,
) -> Pipeline<CommandMessage<C>, R>
where
    C: Command,
    R: Send + 'static,
{
    Pipeline::new(
        handler,
        vec![
            Arc::new(DeadlineGate),
            Arc::new(TenantEnrich),
            Arc::new(TracingInject),
            Arc::new(MetricsInterceptor::new(
                "tenant.command.interceptor.duration",
                "tenant.command.interceptor.outcome",
                |_m: &CommandMessage<C>| short_type_name::<C>().to_string(),
            )),
        ],
    )
}

/// The standard query chain around `handler`, binding the tenant to the
/// storage session via `binder`.
pub fn query_pipeline<Q, R, B>(
    handler: Arc<dyn Handler<QueryMessage<Q>, R>>,
    binder: B,
) -> Pipeline<QueryMessage<Q>, R>
where
    Q: Query,
    R: Send + 'static,
    B: SessionBinder + 'static,
{
    Pipeline::new(
        handler,
        vec![
            Arc::new(DeadlineGate),
            Arc::new(TenantEnrich),
            Arc::new(SessionBind::new(binder)),
            Arc::new(MetricsInterceptor::new(
                "tenant.query.interceptor.duration",
                "tenant.query.interceptor.outcome",
                |_m: &QueryMessage<Q>| short_type_name::<Q>().to_string(),
            )),
        ],
    )
}

/// The standard event chain around `handler` (the registered updater).
pub fn event_pipeline<E, R, L>(
    handler: Arc<dyn Handler<EventEnvelope<E>, R>>,
    limiter: L,
) -> Pipeline<EventEnvelope<E>, R>
where
    E: Send + 'static,
    R: Send + 'static,
    L: RateLimiter + 'static,
{
    Pipeline::new(
        handler,
        vec![
            Arc::new(TenantRestore),
            Arc::new(RateLimit::new(limiter)),
            Arc::new(TracingRestore),
            Arc::new(MetricsInterceptor::new(
                "tenant.event.interceptor.duration",
                "tenant.event.interceptor.outcome",
                |env: &EventEnvelope<E>| env.event_type().to_string(),
            )),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use nimbus_core::{AggregateId, CorrelationId, TenantId};
    use nimbus_events::{EventMetadata, HasTenant};
    use nimbus_observability::metrics;
    use nimbus_tenant::TenantContext;

    use crate::error::DispatchError;
    use crate::rate_limit::InMemorySlidingWindow;
    use crate::session::InMemorySessionBinder;

    fn tenant(n: u128) -> TenantId {
        TenantId::from_uuid(uuid::Uuid::from_u128(n))
    }

    #[derive(Debug, Clone)]
    struct RequestVm {
        tenant_id: TenantId,
        request_id: AggregateId,
    }

    impl HasTenant for RequestVm {
        fn tenant_id(&self) -> TenantId {
            self.tenant_id
        }
    }

    impl Command for RequestVm {
        fn aggregate_id(&self) -> AggregateId {
            self.request_id
        }
    }

    #[derive(Debug, Clone)]
    struct ListVms {
        tenant_id: TenantId,
    }

    impl HasTenant for ListVms {
        fn tenant_id(&self) -> TenantId {
            self.tenant_id
        }
    }

    impl Query for ListVms {}

    #[tokio::test]
    async fn command_chain_enriches_and_meters() {
        let pipeline = command_pipeline::<RequestVm, Option<TenantId>>(Arc::new(
            |_m: CommandMessage<RequestVm>| async move {
                Ok::<Option<TenantId>, DispatchError>(TenantContext::current())
            },
        ));

        let before = metrics::counter("tenant.command.interceptor.outcome", "RequestVm:success");
        let seen = pipeline
            .dispatch(CommandMessage::new(RequestVm {
                tenant_id: tenant(1),
                request_id: AggregateId::new(),
            }))
            .await
            .unwrap();

        assert_eq!(seen, Some(tenant(1)));
        assert_eq!(
            metrics::counter("tenant.command.interceptor.outcome", "RequestVm:success"),
            before + 1
        );
    }

    #[tokio::test]
    async fn query_chain_binds_the_session() {
        let binder = Arc::new(InMemorySessionBinder::new());
        let pipeline = query_pipeline::<ListVms, u32, _>(
            Arc::new(|_m: QueryMessage<ListVms>| async move { Ok::<u32, DispatchError>(3) }),
            binder.clone(),
        );

        let rows = pipeline
            .dispatch(QueryMessage::new(ListVms { tenant_id: tenant(4) }))
            .await
            .unwrap();
        assert_eq!(rows, 3);
        assert_eq!(binder.bound(), vec![tenant(4)]);
    }

    #[tokio::test]
    async fn query_chain_failure_is_metered_with_error_type() {
        let binder = Arc::new(InMemorySessionBinder::new());
        let pipeline = query_pipeline::<ListVms, u32, _>(
            Arc::new(|_m: QueryMessage<ListVms>| async move {
                Err::<u32, DispatchError>(DispatchError::Storage("read model offline".into()))
            }),
            binder,
        );

        let before = metrics::counter("tenant.query.interceptor.outcome", "ListVms:storage_failure");
        pipeline
            .dispatch(QueryMessage::new(ListVms { tenant_id: tenant(4) }))
            .await
            .unwrap_err();
        assert_eq!(
            metrics::counter("tenant.query.interceptor.outcome", "ListVms:storage_failure"),
            before + 1
        );
    }

    fn envelope(meta: EventMetadata) -> EventEnvelope<serde_json::Value> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            AggregateId::from_uuid(uuid::Uuid::from_u128(77)),
            "provisioning.vm_request",
            "provisioning.vm_request.created",
            1,
            serde_json::json!({"flavor": "m1.small"}),
            meta,
        )
    }

    #[tokio::test]
    async fn event_chain_restores_context_and_unwinds() {
        let pipeline = event_pipeline::<serde_json::Value, Option<TenantId>, _>(
            Arc::new(|_env: EventEnvelope<serde_json::Value>| async move {
                Ok::<Option<TenantId>, DispatchError>(TenantContext::current())
            }),
            InMemorySlidingWindow::per_second(100),
        );

        assert_eq!(TenantContext::current(), None);
        let seen = pipeline
            .dispatch(envelope(EventMetadata::for_tenant(
                tenant(6),
                None,
                CorrelationId::new(),
                Utc::now(),
            )))
            .await
            .unwrap();
        assert_eq!(seen, Some(tenant(6)));
        assert_eq!(TenantContext::current(), None);
    }

    #[tokio::test]
    async fn event_chain_pops_context_even_when_the_updater_fails() {
        let pipeline = event_pipeline::<serde_json::Value, (), _>(
            Arc::new(|_env: EventEnvelope<serde_json::Value>| async move {
                Err::<(), DispatchError>(DispatchError::Projection("updater exploded".into()))
            }),
            InMemorySlidingWindow::per_second(100),
        );

        let err = pipeline
            .dispatch(envelope(EventMetadata::for_tenant(
                tenant(6),
                None,
                CorrelationId::new(),
                Utc::now(),
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Projection(_)));
        assert_eq!(TenantContext::current(), None);
        assert_eq!(TenantContext::depth(), 0);
    }

    #[tokio::test]
    async fn event_chain_rejects_tenantless_events_with_generic_denial() {
        let pipeline = event_pipeline::<serde_json::Value, (), _>(
            Arc::new(|_env: EventEnvelope<serde_json::Value>| async move {
                Ok::<(), DispatchError>(())
            }),
            InMemorySlidingWindow::per_second(100),
        );

        let err = pipeline
            .dispatch(envelope(EventMetadata::system(CorrelationId::new(), Utc::now())))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), nimbus_core::GENERIC_DENIAL);
    }

    #[tokio::test]
    async fn event_chain_enforces_the_rate_limit_boundary() {
        let pipeline = event_pipeline::<serde_json::Value, (), _>(
            Arc::new(|_env: EventEnvelope<serde_json::Value>| async move {
                Ok::<(), DispatchError>(())
            }),
            InMemorySlidingWindow::per_second(2),
        );

        let meta = || EventMetadata::for_tenant(tenant(8), None, CorrelationId::new(), Utc::now());

        // Exactly the limit is accepted.
        pipeline.dispatch(envelope(meta())).await.unwrap();
        pipeline.dispatch(envelope(meta())).await.unwrap();

        // One more in the same window is the generic denial.
        let err = pipeline.dispatch(envelope(meta())).await.unwrap_err();
        assert_eq!(err.to_string(), nimbus_core::GENERIC_DENIAL);
        assert!(matches!(err, DispatchError::RateLimited { .. }));
    }
}
