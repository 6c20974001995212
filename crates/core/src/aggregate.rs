//! Event-sourced aggregate contract.

use crate::id::AggregateId;

/// An event-sourced aggregate: a consistency boundary reconstituted by
/// folding its event history and mutated only by applying events.
///
/// Contracts the runtime relies on:
/// - `handle` is pure: it decides events or rejects, it never mutates state.
/// - `apply` is total for every event type the aggregate can produce and is
///   deterministic over the event history.
/// - `version` equals the number of events applied so far (0 for a fresh
///   instance, 1 after the creation event).
pub trait Aggregate {
    type Command;
    type Event;
    type Error: core::fmt::Debug + Send + Sync + 'static;

    /// Stable stream-type discriminator, e.g. `"provisioning.vm_request"`.
    const AGGREGATE_TYPE: &'static str;

    fn id(&self) -> AggregateId;

    /// Number of events applied to this instance.
    fn version(&self) -> u64;

    /// Decide which events (if any) this command produces.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Evolve state by one event. Implementations must also advance the
    /// version by exactly one.
    fn apply(&mut self, event: &Self::Event);
}

/// Execute a command against an aggregate in place: decide, then apply each
/// decided event. No IO, no async; useful for unit tests and inline flows.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = aggregate.handle(command)?;
    for event in &events {
        aggregate.apply(event);
    }
    Ok(events)
}
