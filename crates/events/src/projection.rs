use crate::{Event, EventEnvelope};

/// A projection builds a read model by folding an append-only event stream.
///
/// Projections are pure event consumers; persistence is outside this crate.
/// They are disposable: replaying the full history from empty state must
/// yield the same read model.
pub trait Projection {
    type Ev: Event;

    /// Apply a single event to the projection.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
