//! Dispatch error taxonomy.

use thiserror::Error;

use nimbus_core::error::GENERIC_DENIAL;
use nimbus_core::{DomainError, TenantId};
use nimbus_tenant::MissingTenantContext;

/// Failure of a dispatched unit of work.
///
/// `AccessDenied` and `RateLimited` display the generic denial message so
/// that nothing security-sensitive leaks through an external channel; the
/// internal reason is logged and metered where the error is raised.
/// Concurrency conflicts stay distinct so callers can prompt a
/// retry-with-reload.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Security-sensitive denial (missing/blank/mismatched tenant metadata,
    /// failed enrichment). The reason never reaches the caller.
    #[error("{GENERIC_DENIAL}")]
    AccessDenied { reason: String },

    /// Optimistic concurrency failure on append; the core never retries.
    #[error("concurrency conflict: expected version {expected}, actual {actual}")]
    Concurrency { expected: u64, actual: u64 },

    /// Data-path integration error: no tenant on the stack. Reported as an
    /// internal error, never as a denial.
    #[error(transparent)]
    MissingTenant(#[from] MissingTenantContext),

    /// Per-tenant event-rate ceiling hit. Externally identical to a denial.
    #[error("{GENERIC_DENIAL}")]
    RateLimited { tenant_id: TenantId },

    /// The unit of work outlived its deadline; context and bindings were
    /// released during unwind.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Storage-layer I/O or schema failure.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Read-model updater failure; recoverable by replay.
    #[error("projection failure: {0}")]
    Projection(String),

    /// Business-rule rejection from an aggregate handler (pass-through).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Historical event payload did not match the aggregate's event type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    /// Publication failed after a successful append (at-least-once; a retry
    /// may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Stable metric label for this variant.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchError::AccessDenied { .. } => "access_denied",
            DispatchError::Concurrency { .. } => "concurrency_conflict",
            DispatchError::MissingTenant(_) => "missing_tenant_context",
            DispatchError::RateLimited { .. } => "rate_limit_exceeded",
            DispatchError::DeadlineExceeded => "deadline_exceeded",
            DispatchError::Storage(_) => "storage_failure",
            DispatchError::Projection(_) => "projection_error",
            DispatchError::Domain(_) => "domain_error",
            DispatchError::Deserialize(_) => "deserialize_error",
            DispatchError::Publish(_) => "publish_error",
        }
    }

    /// Whether this failure is shown to callers as the generic denial.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            DispatchError::AccessDenied { .. } | DispatchError::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denials_display_the_generic_message() {
        let denied = DispatchError::access_denied("payload tenant missing");
        assert_eq!(denied.to_string(), GENERIC_DENIAL);

        let limited = DispatchError::RateLimited {
            tenant_id: TenantId::from_uuid(uuid::Uuid::from_u128(1)),
        };
        assert_eq!(limited.to_string(), GENERIC_DENIAL);
    }

    #[test]
    fn conflicts_stay_distinguishable() {
        let conflict = DispatchError::Concurrency {
            expected: 2,
            actual: 3,
        };
        assert!(!conflict.is_denial());
        assert!(conflict.to_string().contains("expected version 2"));
    }
}
