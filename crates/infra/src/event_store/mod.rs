pub mod in_memory;
pub mod postgres;
pub mod store;

pub use in_memory::{InMemoryEventStore, InMemorySnapshotStore};
pub use postgres::PostgresEventStore;
pub use store::{
    EventStore, EventStoreError, Snapshot, SnapshotStore, StoredEvent, UncommittedEvent,
};
