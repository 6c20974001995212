//! Trace-context propagation.
//!
//! The ambient trace is task-local, set by ingress (from inbound headers) or
//! by `TracingRestore` when an event carries a remote context. `TracingInject`
//! copies it into outgoing command metadata so downstream events inherit it.
//! Flags travel verbatim end-to-end; when the caller has none, none is
//! invented, so sampling decisions stay stable.

use std::future::Future;

use async_trait::async_trait;
use tracing::Instrument;
use tracing::field::Empty;

use nimbus_events::{EventEnvelope, TraceContext};

use crate::error::DispatchError;
use crate::message::WithMetadata;
use crate::pipeline::{Handler, Interceptor};

tokio::task_local! {
    static CURRENT_TRACE: TraceContext;
}

/// Run `fut` with `trace` as the ambient trace context.
pub async fn with_trace<F>(trace: TraceContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_TRACE.scope(trace, fut).await
}

/// The ambient trace context, if any.
pub fn current_trace() -> Option<TraceContext> {
    CURRENT_TRACE.try_with(|trace| trace.clone()).ok()
}

/// Copies the ambient trace context into outgoing command metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInject;

#[async_trait]
impl<M, R> Interceptor<M, R> for TracingInject
where
    M: WithMetadata + Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str {
        "tracing_inject"
    }

    async fn around(&self, mut message: M, next: &dyn Handler<M, R>) -> Result<R, DispatchError> {
        if message.metadata().trace.is_none() {
            if let Some(trace) = current_trace() {
                message.metadata_mut().trace = Some(trace);
            }
        }
        next.handle(message).await
    }
}

/// Reconstructs a remote span context from event metadata and runs the
/// updater inside a child span named after the event type.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRestore;

#[async_trait]
impl<E, R> Interceptor<EventEnvelope<E>, R> for TracingRestore
where
    E: Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str {
        "tracing_restore"
    }

    async fn around(
        &self,
        envelope: EventEnvelope<E>,
        next: &dyn Handler<EventEnvelope<E>, R>,
    ) -> Result<R, DispatchError> {
        let span = tracing::info_span!(
            "event.consume",
            event_type = envelope.event_type(),
            trace_id = Empty,
            span_id = Empty,
            trace_flags = Empty,
            error = Empty,
        );

        let remote = envelope.metadata().trace();
        if let Some(trace) = &remote {
            span.record("trace_id", trace.trace_id.as_str());
            span.record("span_id", trace.span_id.as_str());
            if let Some(flags) = &trace.trace_flags {
                span.record("trace_flags", flags.as_str());
            }
        }

        let result = match remote {
            // Keep the remote context ambient so commands dispatched by the
            // updater inherit it.
            Some(trace) => {
                with_trace(trace, next.handle(envelope))
                    .instrument(span.clone())
                    .await
            }
            None => next.handle(envelope).instrument(span.clone()).await,
        };

        if let Err(err) = &result {
            span.record("error", true);
            tracing::error!(parent: &span, error = %err, "event handler failed");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use nimbus_core::{AggregateId, CorrelationId};
    use nimbus_events::EventMetadata;

    use crate::message::{CommandMessage, MessageMetadata};
    use crate::pipeline::Pipeline;

    fn sample_trace() -> TraceContext {
        TraceContext::new(
            "0af7651916cd43dd8448eb211c80319c",
            "b7ad6b7169203331",
            Some("01".to_string()),
        )
        .unwrap()
    }

    #[derive(Debug, Clone)]
    struct Noop;

    impl nimbus_events::HasTenant for Noop {
        fn tenant_id(&self) -> nimbus_core::TenantId {
            nimbus_core::TenantId::from_uuid(uuid::Uuid::from_u128(1))
        }
    }

    #[tokio::test]
    async fn inject_copies_ambient_trace_into_metadata() {
        let pipeline: Pipeline<CommandMessage<Noop>, Option<TraceContext>> = Pipeline::new(
            Arc::new(|msg: CommandMessage<Noop>| async move {
                Ok::<Option<TraceContext>, DispatchError>(msg.metadata.trace)
            }),
            vec![Arc::new(TracingInject)],
        );

        let observed = with_trace(sample_trace(), pipeline.dispatch(CommandMessage::new(Noop)))
            .await
            .unwrap();
        assert_eq!(observed, Some(sample_trace()));
    }

    #[tokio::test]
    async fn inject_does_not_overwrite_an_existing_trace() {
        let existing = TraceContext::new(
            "11111111111111111111111111111111",
            "2222222222222222",
            None,
        )
        .unwrap();

        let pipeline: Pipeline<CommandMessage<Noop>, Option<TraceContext>> = Pipeline::new(
            Arc::new(|msg: CommandMessage<Noop>| async move {
                Ok::<Option<TraceContext>, DispatchError>(msg.metadata.trace)
            }),
            vec![Arc::new(TracingInject)],
        );

        let message = CommandMessage::with_metadata(
            Noop,
            MessageMetadata::new().with_trace(existing.clone()),
        );
        let observed = with_trace(sample_trace(), pipeline.dispatch(message))
            .await
            .unwrap();
        assert_eq!(observed, Some(existing));
    }

    #[tokio::test]
    async fn inject_leaves_metadata_empty_without_ambient_trace() {
        let pipeline: Pipeline<CommandMessage<Noop>, Option<TraceContext>> = Pipeline::new(
            Arc::new(|msg: CommandMessage<Noop>| async move {
                Ok::<Option<TraceContext>, DispatchError>(msg.metadata.trace)
            }),
            vec![Arc::new(TracingInject)],
        );

        let observed = pipeline.dispatch(CommandMessage::new(Noop)).await.unwrap();
        assert_eq!(observed, None);
    }

    #[tokio::test]
    async fn restore_makes_the_event_trace_ambient_for_the_handler() {
        let meta = EventMetadata::for_tenant(
            nimbus_core::TenantId::from_uuid(uuid::Uuid::from_u128(1)),
            None,
            CorrelationId::new(),
            Utc::now(),
        )
        .with_trace(&sample_trace());

        let envelope = EventEnvelope::new(
            uuid::Uuid::now_v7(),
            AggregateId::from_uuid(uuid::Uuid::from_u128(2)),
            "test.aggregate",
            "test.aggregate.touched",
            1,
            serde_json::json!({}),
            meta,
        );

        let pipeline: Pipeline<EventEnvelope<serde_json::Value>, Option<TraceContext>> =
            Pipeline::new(
                Arc::new(|_env: EventEnvelope<serde_json::Value>| async move {
                    Ok::<Option<TraceContext>, DispatchError>(current_trace())
                }),
                vec![Arc::new(TracingRestore)],
            );

        let observed = pipeline.dispatch(envelope).await.unwrap();
        assert_eq!(observed, Some(sample_trace()));
        assert_eq!(current_trace(), None);
    }
}
