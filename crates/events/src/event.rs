use chrono::{DateTime, Utc};

/// A domain event: an immutable fact produced by an aggregate transition.
///
/// Events are the source of truth. They are append-only, replayable, and
/// serialized to JSON for storage and transport, so implementations must be
/// `Serialize`/`Deserialize` as well (enforced where the store needs it).
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable, fully qualified event name, e.g.
    /// `"provisioning.vm_request.created"`.
    ///
    /// Never change this for an existing event: historical payloads are
    /// looked up by it.
    fn event_type(&self) -> &'static str;

    /// Business time: when the fact occurred in the domain, as opposed to
    /// when the infrastructure persisted it.
    fn occurred_at(&self) -> DateTime<Utc>;
}
