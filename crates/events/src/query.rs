use crate::command::HasTenant;

/// A query: a read-model lookup. Carries its tenant in the payload like
/// commands do; the query chain binds that tenant to the storage session
/// before the handler runs.
pub trait Query: HasTenant + core::fmt::Debug + Send + Sync + 'static {}
