use nimbus_core::{AggregateId, TenantId};

/// Capability interface for tenant-carrying messages.
///
/// Every command and query is required by framework convention to carry its
/// tenant in the payload: messages may be dispatched from background contexts
/// where no ambient tenant is set, so the payload is the only common ground.
/// The requirement is enforced here as a trait bound, at registration time,
/// rather than by inspecting arbitrary payloads at runtime.
pub trait HasTenant {
    fn tenant_id(&self) -> TenantId;
}

/// A command: intent to change one aggregate.
///
/// Commands are transient - they are decided into events (which are
/// persisted) or rejected. Each command targets exactly one aggregate, which
/// is the transaction and concurrency boundary.
pub trait Command: HasTenant + core::fmt::Debug + Send + Sync + 'static {
    fn aggregate_id(&self) -> AggregateId;
}
