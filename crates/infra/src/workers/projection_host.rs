//! Asynchronous event delivery to read-model updaters (C8).
//!
//! One host task consumes a bus subscription sequentially, which preserves
//! write order per aggregate stream. Every delivery runs through the event
//! chain (tenant restore → rate limit → tracing restore → metrics), so the
//! updater always sees the event's tenant on the context stack and the
//! stack is empty again before the next message. Delivery is at-least-once;
//! updaters must be idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use nimbus_core::TenantId;
use nimbus_dispatch::{DispatchError, Pipeline, RateLimiter, event_pipeline};
use nimbus_events::{EventEnvelope, Subscription, TenantScoped};
use nimbus_observability::metrics;

/// A registered read-model updater.
///
/// Updaters receive JSON envelopes (payload typing is the updater's
/// concern), run with the tenant context populated, and report failures as
/// [`DispatchError::Projection`]. Projection state is disposable: replaying
/// the log from empty state must rebuild it.
#[async_trait]
pub trait ProjectionUpdater: Send + Sync {
    fn name(&self) -> &'static str;

    /// Event types this updater consumes; empty means all.
    fn event_types(&self) -> &[&'static str] {
        &[]
    }

    async fn update(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), DispatchError>;
}

#[async_trait]
impl<U> ProjectionUpdater for Arc<U>
where
    U: ProjectionUpdater + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn event_types(&self) -> &[&'static str] {
        (**self).event_types()
    }

    async fn update(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), DispatchError> {
        (**self).update(envelope).await
    }
}

/// Hosts registered updaters behind the event chain.
pub struct ProjectionHost {
    pipeline: Pipeline<EventEnvelope<JsonValue>, ()>,
    /// When set, events of other tenants are skipped before the chain runs.
    pin: Option<TenantId>,
}

impl ProjectionHost {
    pub fn new<L>(updaters: Vec<Arc<dyn ProjectionUpdater>>, limiter: L) -> Self
    where
        L: RateLimiter + 'static,
    {
        Self::build(updaters, limiter, None)
    }

    /// Host pinned to one tenant: events of other tenants are ignored
    /// before any updater runs (defense in depth for per-tenant workers).
    pub fn new_for_tenant<L>(
        tenant_id: TenantId,
        updaters: Vec<Arc<dyn ProjectionUpdater>>,
        limiter: L,
    ) -> Self
    where
        L: RateLimiter + 'static,
    {
        Self::build(updaters, limiter, Some(tenant_id))
    }

    fn build<L>(
        updaters: Vec<Arc<dyn ProjectionUpdater>>,
        limiter: L,
        pin: Option<TenantId>,
    ) -> Self
    where
        L: RateLimiter + 'static,
    {
        let updaters = Arc::new(updaters);
        let handler = {
            let updaters = updaters.clone();
            move |envelope: EventEnvelope<JsonValue>| {
                let updaters = updaters.clone();
                async move {
                    for updater in updaters.iter() {
                        let wants = updater.event_types();
                        if !wants.is_empty() && !wants.iter().any(|t| *t == envelope.event_type()) {
                            continue;
                        }
                        updater.update(&envelope).await?;
                    }
                    Ok::<(), DispatchError>(())
                }
            }
        };

        Self {
            pipeline: event_pipeline(Arc::new(handler), limiter),
            pin,
        }
    }

    /// Deliver one envelope through the event chain.
    pub async fn deliver(&self, envelope: EventEnvelope<JsonValue>) -> Result<(), DispatchError> {
        if let Some(pin) = self.pin {
            if TenantScoped::tenant_id(&envelope) != Some(pin) {
                metrics::incr("projection.delivery.skipped", "foreign_tenant");
                return Ok(());
            }
        }
        self.pipeline.dispatch(envelope).await
    }

    /// Consume `subscription` on a background task until shutdown or the
    /// publisher goes away. Failed deliveries are logged and metered; the
    /// infrastructure retry policy (replay) lives outside the core.
    pub fn spawn(self: Arc<Self>, mut subscription: Subscription<EventEnvelope<JsonValue>>) -> HostHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    message = subscription.recv() => {
                        let Some(envelope) = message else { break };
                        let event_type = envelope.event_type().to_string();
                        if let Err(err) = self.deliver(envelope).await {
                            metrics::incr("projection.delivery.failed", err.label());
                            warn!(event_type, error = %err, "projection delivery failed");
                        }
                    }
                }
            }
        });

        HostHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}

/// Handle to stop and join a running host.
pub struct HostHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl HostHandle {
    /// Request shutdown and wait for the host task to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}
