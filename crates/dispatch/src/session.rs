//! Storage-session binding for the query chain.
//!
//! The binder resolves the active tenant and prepares the tenant-bound unit
//! of work before the read-model handler runs; no handler runs without a
//! successful bind. The concrete Postgres binder lives in the infrastructure
//! crate and scopes the binding to a transaction; the in-memory binder here
//! backs tests and records what was bound.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use nimbus_core::TenantId;
use nimbus_observability::metrics;
use nimbus_tenant::TenantContext;

use crate::error::DispatchError;
use crate::pipeline::{Handler, Interceptor};

/// Proof that a tenant was bound for the current unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBinding {
    pub tenant_id: TenantId,
}

/// Binds the active tenant to the storage session.
#[async_trait]
pub trait SessionBinder: Send + Sync {
    /// Resolve `TenantContext::require()` and make the tenant visible to the
    /// row-filter predicate for this unit of work. Fails closed when no
    /// tenant is active.
    async fn bind(&self) -> Result<SessionBinding, DispatchError>;
}

#[async_trait]
impl<B> SessionBinder for Arc<B>
where
    B: SessionBinder + ?Sized,
{
    async fn bind(&self) -> Result<SessionBinding, DispatchError> {
        (**self).bind().await
    }
}

/// Binder for tests and in-memory read models: requires an active tenant and
/// records every bind.
#[derive(Debug, Default)]
pub struct InMemorySessionBinder {
    bound: Mutex<Vec<TenantId>>,
}

impl InMemorySessionBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenants bound so far, in order.
    pub fn bound(&self) -> Vec<TenantId> {
        self.bound.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SessionBinder for InMemorySessionBinder {
    async fn bind(&self) -> Result<SessionBinding, DispatchError> {
        let tenant_id = TenantContext::require()?;
        if let Ok(mut bound) = self.bound.lock() {
            bound.push(tenant_id);
        }
        Ok(SessionBinding { tenant_id })
    }
}

/// Query-chain interceptor: bind before the handler, nothing to undo on
/// unwind (bindings are transaction-scoped and vanish with commit/rollback).
pub struct SessionBind<B> {
    binder: B,
}

impl<B> SessionBind<B> {
    pub fn new(binder: B) -> Self {
        Self { binder }
    }
}

#[async_trait]
impl<M, R, B> Interceptor<M, R> for SessionBind<B>
where
    M: Send + 'static,
    R: Send + 'static,
    B: SessionBinder,
{
    fn name(&self) -> &'static str {
        "session_bind"
    }

    async fn around(&self, message: M, next: &dyn Handler<M, R>) -> Result<R, DispatchError> {
        let binding = self.binder.bind().await?;
        metrics::incr("tenant.session.bound", "");
        tracing::debug!(tenant_id = %binding.tenant_id, "tenant bound to storage session");

        next.handle(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nimbus_core::AggregateId;
    use nimbus_events::{HasTenant, Query};

    use crate::message::QueryMessage;
    use crate::pipeline::Pipeline;
    use crate::tenant::TenantEnrich;

    fn tenant(n: u128) -> TenantId {
        TenantId::from_uuid(uuid::Uuid::from_u128(n))
    }

    #[derive(Debug, Clone)]
    struct LookupVm {
        tenant_id: TenantId,
        #[allow(dead_code)]
        request_id: AggregateId,
    }

    impl HasTenant for LookupVm {
        fn tenant_id(&self) -> TenantId {
            self.tenant_id
        }
    }

    impl Query for LookupVm {}

    #[tokio::test]
    async fn bind_fails_closed_without_tenant() {
        let binder = Arc::new(InMemorySessionBinder::new());
        let pipeline: Pipeline<QueryMessage<LookupVm>, ()> = Pipeline::new(
            Arc::new(|_q: QueryMessage<LookupVm>| async move { Ok::<(), DispatchError>(()) }),
            vec![Arc::new(SessionBind::new(binder.clone()))],
        );

        // No TenantEnrich ahead of the binder and no ambient context.
        let err = pipeline
            .dispatch(QueryMessage::new(LookupVm {
                tenant_id: tenant(1),
                request_id: AggregateId::new(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingTenant(_)));
        assert!(binder.bound().is_empty());
    }

    #[tokio::test]
    async fn bind_records_the_enriched_tenant() {
        let binder = Arc::new(InMemorySessionBinder::new());
        let pipeline: Pipeline<QueryMessage<LookupVm>, ()> = Pipeline::new(
            Arc::new(|_q: QueryMessage<LookupVm>| async move { Ok::<(), DispatchError>(()) }),
            vec![
                Arc::new(TenantEnrich),
                Arc::new(SessionBind::new(binder.clone())),
            ],
        );

        pipeline
            .dispatch(QueryMessage::new(LookupVm {
                tenant_id: tenant(7),
                request_id: AggregateId::new(),
            }))
            .await
            .unwrap();

        assert_eq!(binder.bound(), vec![tenant(7)]);
    }
}
