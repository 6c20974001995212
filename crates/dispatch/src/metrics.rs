//! Metrics interceptor: per-message-type timers and outcome counters.

use std::time::Instant;

use async_trait::async_trait;

use nimbus_observability::metrics;

use crate::error::DispatchError;
use crate::pipeline::{Handler, Interceptor};

/// Records a duration and a success/failure counter around the rest of the
/// chain, keyed by a per-message label (command type, query type, event
/// type). Failures are additionally tagged with the error type.
pub struct MetricsInterceptor<M> {
    duration_metric: &'static str,
    outcome_metric: &'static str,
    label_of: Box<dyn Fn(&M) -> String + Send + Sync>,
}

impl<M> MetricsInterceptor<M> {
    pub fn new(
        duration_metric: &'static str,
        outcome_metric: &'static str,
        label_of: impl Fn(&M) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            duration_metric,
            outcome_metric,
            label_of: Box::new(label_of),
        }
    }
}

/// The unqualified name of `T`, used as the default message label.
pub fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[async_trait]
impl<M, R> Interceptor<M, R> for MetricsInterceptor<M>
where
    M: Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn around(&self, message: M, next: &dyn Handler<M, R>) -> Result<R, DispatchError> {
        let label = (self.label_of)(&message);
        let started = Instant::now();

        let result = next.handle(message).await;

        metrics::observe_duration(self.duration_metric, &label, started.elapsed());
        match &result {
            Ok(_) => metrics::incr(self.outcome_metric, &format!("{label}:success")),
            Err(err) => {
                metrics::incr(self.outcome_metric, &format!("{label}:{}", err.label()));
            }
        }

        result
    }
}
