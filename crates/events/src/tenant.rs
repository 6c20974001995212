use nimbus_core::TenantId;

use crate::EventEnvelope;

/// Helper trait for tenant-scoped messages.
///
/// Marks types with an associated tenant, enabling tenant-aware processing in
/// infrastructure components (the projection host filters and restores
/// context through it). The tenant is optional: system-level events may carry
/// none, and consumers fail closed on those.
pub trait TenantScoped {
    fn tenant_id(&self) -> Option<TenantId>;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id()
    }
}
