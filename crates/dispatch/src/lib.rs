//! Message dispatch: explicit interceptor pipelines for commands, queries
//! and events.
//!
//! Composition is data, not metadata: a chain is a list of interceptors
//! applied in order around a handler, with the opposite order on unwind. Any
//! interceptor can short-circuit by failing; security-sensitive failures
//! collapse to the generic denial message at external boundaries.

pub mod chains;
pub mod deadline;
pub mod error;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod session;
pub mod tenant;
pub mod trace;

pub use chains::{command_pipeline, event_pipeline, query_pipeline};
pub use deadline::DeadlineGate;
pub use error::DispatchError;
pub use message::{CommandMessage, MessageMetadata, QueryMessage, WithMetadata};
pub use metrics::MetricsInterceptor;
pub use pipeline::{Handler, Interceptor, Pipeline};
pub use rate_limit::{
    InMemorySlidingWindow, RateLimit, RateLimiter, RateLimitUnavailable, UnavailableRateLimiter,
    tenant_rate_key,
};
pub use session::{InMemorySessionBinder, SessionBind, SessionBinder, SessionBinding};
pub use tenant::{TenantEnrich, TenantRestore};
pub use trace::{TracingInject, TracingRestore, current_trace, with_trace};
