//! Infrastructure: event store backends, tenant-bound storage sessions, the
//! aggregate runtime, and the projection host.

pub mod aggregate_runtime;
pub mod event_store;
pub mod read_model;
pub mod session;
pub mod workers;

#[cfg(feature = "redis")]
pub mod redis_support;


pub use aggregate_runtime::AggregateRuntime;
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, InMemorySnapshotStore, PostgresEventStore,
    Snapshot, SnapshotStore, StoredEvent, UncommittedEvent,
};
pub use read_model::{InMemoryTenantStore, TenantStore};
pub use session::{PgSessionBinder, SessionError, TenantSession, bind_tenant};
pub use workers::{HostHandle, ProjectionHost, ProjectionUpdater};
