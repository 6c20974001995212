//! Per-tenant event-rate limiting (sliding window).
//!
//! Rate limiting is a DoS control, not a correctness control: when the
//! counter backend is unreachable the chain proceeds and emits
//! `rate_limit_error` instead of denying (graceful degradation) - the
//! opposite of the revocation set's fail-closed policy.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use nimbus_core::TenantId;
use nimbus_events::EventEnvelope;
use nimbus_observability::metrics;

use crate::error::DispatchError;
use crate::pipeline::{Handler, Interceptor};

/// Counter key for a tenant's event rate.
pub fn tenant_rate_key(tenant_id: TenantId) -> String {
    format!("tenant:events:rate:{tenant_id}")
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("rate limit backend unavailable: {0}")]
pub struct RateLimitUnavailable(pub String);

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// `true` when the event is admitted under `key`'s window.
    async fn try_acquire(&self, key: &str) -> Result<bool, RateLimitUnavailable>;
}

#[async_trait]
impl<L> RateLimiter for Arc<L>
where
    L: RateLimiter + ?Sized,
{
    async fn try_acquire(&self, key: &str) -> Result<bool, RateLimitUnavailable> {
        (**self).try_acquire(key).await
    }
}

/// In-process sliding window: admission timestamps per key, pruned on each
/// acquire.
#[derive(Debug)]
pub struct InMemorySlidingWindow {
    limit: u32,
    window: Duration,
    admissions: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl InMemorySlidingWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            admissions: Mutex::new(HashMap::new()),
        }
    }

    /// One-second window, the event chain's shape.
    pub fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }
}

#[async_trait]
impl RateLimiter for InMemorySlidingWindow {
    async fn try_acquire(&self, key: &str) -> Result<bool, RateLimitUnavailable> {
        let now = Instant::now();
        let mut admissions = self
            .admissions
            .lock()
            .map_err(|_| RateLimitUnavailable("lock poisoned".to_string()))?;

        let window = admissions.entry(key.to_string()).or_default();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < self.limit as usize {
            window.push_back(now);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Test double simulating an unreachable counter store.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRateLimiter;

#[async_trait]
impl RateLimiter for UnavailableRateLimiter {
    async fn try_acquire(&self, _key: &str) -> Result<bool, RateLimitUnavailable> {
        Err(RateLimitUnavailable("simulated outage".to_string()))
    }
}

/// Event-chain interceptor enforcing the per-tenant ceiling.
pub struct RateLimit<L> {
    limiter: L,
}

impl<L> RateLimit<L> {
    pub fn new(limiter: L) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl<E, R, L> Interceptor<EventEnvelope<E>, R> for RateLimit<L>
where
    E: Send + 'static,
    R: Send + 'static,
    L: RateLimiter,
{
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn around(
        &self,
        envelope: EventEnvelope<E>,
        next: &dyn Handler<EventEnvelope<E>, R>,
    ) -> Result<R, DispatchError> {
        // TenantRestore runs before this; an envelope without a tenant never
        // gets here.
        let Some(tenant_id) = envelope.tenant_id() else {
            return Err(DispatchError::access_denied("event metadata has no tenant"));
        };

        match self.limiter.try_acquire(&tenant_rate_key(tenant_id)).await {
            Ok(true) => next.handle(envelope).await,
            Ok(false) => {
                metrics::incr("tenant.event.rate_limited", "");
                tracing::warn!(tenant_id = %tenant_id, "tenant event rate limit exceeded");
                Err(DispatchError::RateLimited { tenant_id })
            }
            Err(err) => {
                metrics::incr("rate_limit_error", "");
                tracing::warn!(error = %err, "rate limit backend unreachable; proceeding");
                next.handle(envelope).await
            }
        }
    }
}
