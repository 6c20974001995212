//! Deadline propagation and enforcement.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::DispatchError;
use crate::message::WithMetadata;
use crate::pipeline::{Handler, Interceptor};

/// Outermost gate of the command and query chains: a message whose deadline
/// has passed is rejected up front, and the rest of the chain runs under a
/// `tokio` timeout so cancellation unwinds the interceptors (releasing
/// tenant context and session bindings) instead of abandoning them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlineGate;

#[async_trait]
impl<M, R> Interceptor<M, R> for DeadlineGate
where
    M: WithMetadata + Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str {
        "deadline"
    }

    async fn around(&self, message: M, next: &dyn Handler<M, R>) -> Result<R, DispatchError> {
        let Some(deadline) = message.metadata().deadline else {
            return next.handle(message).await;
        };

        let remaining = deadline - Utc::now();
        let Ok(remaining) = remaining.to_std() else {
            // Negative: already expired.
            return Err(DispatchError::DeadlineExceeded);
        };

        match tokio::time::timeout(remaining, next.handle(message)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(DispatchError::DeadlineExceeded),
        }
    }
}
