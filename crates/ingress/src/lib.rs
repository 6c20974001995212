//! HTTP ingress: bearer extraction, token validation, tenant scope.

pub mod middleware;

pub use middleware::{IngressState, TokenGate, tenant_ingress};
