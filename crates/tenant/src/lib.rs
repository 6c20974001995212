//! Task-local tenant context: the single source of truth for "the tenant this
//! task is acting on behalf of".

pub mod context;

pub use context::{ContextError, MissingTenantContext, TenantContext, TenantGuard};
