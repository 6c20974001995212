//! Generic interceptor pipeline.
//!
//! A pipeline is a handler wrapped by interceptors, outermost first. Each
//! interceptor receives the message and the rest of the chain; whatever it
//! does after awaiting `next` runs in unwind order.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;

/// Terminal (or composed) message handler.
#[async_trait]
pub trait Handler<M, R>: Send + Sync
where
    M: Send + 'static,
    R: Send + 'static,
{
    async fn handle(&self, message: M) -> Result<R, DispatchError>;
}

/// Async closures are handlers; the usual way to write leaf handlers and
/// test probes.
#[async_trait]
impl<M, R, F, Fut> Handler<M, R> for F
where
    M: Send + 'static,
    R: Send + 'static,
    F: Fn(M) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, DispatchError>> + Send,
{
    async fn handle(&self, message: M) -> Result<R, DispatchError> {
        (self)(message).await
    }
}

/// One link of a chain. `around` may mutate the message, short-circuit by
/// returning an error, or decorate the call to `next`.
#[async_trait]
pub trait Interceptor<M, R>: Send + Sync
where
    M: Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str;

    async fn around(&self, message: M, next: &dyn Handler<M, R>) -> Result<R, DispatchError>;
}

struct Link<M, R> {
    interceptor: Arc<dyn Interceptor<M, R>>,
    next: Arc<dyn Handler<M, R>>,
}

#[async_trait]
impl<M, R> Handler<M, R> for Link<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    async fn handle(&self, message: M) -> Result<R, DispatchError> {
        self.interceptor.around(message, &*self.next).await
    }
}

/// An interceptor chain around a handler, built once and dispatched many
/// times.
pub struct Pipeline<M, R> {
    entry: Arc<dyn Handler<M, R>>,
}

impl<M, R> Pipeline<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    /// Compose `interceptors` (outermost first) around `handler`.
    pub fn new(
        handler: Arc<dyn Handler<M, R>>,
        interceptors: Vec<Arc<dyn Interceptor<M, R>>>,
    ) -> Self {
        let mut entry = handler;
        for interceptor in interceptors.into_iter().rev() {
            entry = Arc::new(Link {
                interceptor,
                next: entry,
            });
        }
        Self { entry }
    }

    pub async fn dispatch(&self, message: M) -> Result<R, DispatchError> {
        self.entry.handle(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Appends its tag on the way in and `~tag` on the way out.
    struct Tagger {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor<u32, u32> for Tagger {
        fn name(&self) -> &'static str {
            self.tag
        }

        async fn around(&self, message: u32, next: &dyn Handler<u32, u32>) -> Result<u32, DispatchError> {
            self.log.lock().unwrap().push(self.tag.to_string());
            let result = next.handle(message).await;
            self.log.lock().unwrap().push(format!("~{}", self.tag));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Interceptor<u32, u32> for ShortCircuit {
        fn name(&self) -> &'static str {
            "short_circuit"
        }

        async fn around(&self, _message: u32, _next: &dyn Handler<u32, u32>) -> Result<u32, DispatchError> {
            Err(DispatchError::access_denied("blocked"))
        }
    }

    #[tokio::test]
    async fn interceptors_run_in_order_and_unwind_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            Arc::new(|m: u32| async move { Ok::<u32, DispatchError>(m * 2) }),
            vec![
                Arc::new(Tagger { tag: "a", log: log.clone() }),
                Arc::new(Tagger { tag: "b", log: log.clone() }),
            ],
        );

        assert_eq!(pipeline.dispatch(21).await.unwrap(), 42);
        assert_eq!(*log.lock().unwrap(), ["a", "b", "~b", "~a"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_inner_links_but_unwinds_outer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_calls = Arc::new(Mutex::new(0u32));
        let calls = handler_calls.clone();
        let pipeline = Pipeline::new(
            Arc::new(move |m: u32| {
                let calls = calls.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    Ok::<u32, DispatchError>(m)
                }
            }),
            vec![
                Arc::new(Tagger { tag: "outer", log: log.clone() }),
                Arc::new(ShortCircuit),
                Arc::new(Tagger { tag: "inner", log: log.clone() }),
            ],
        );

        let err = pipeline.dispatch(1).await.unwrap_err();
        assert!(err.is_denial());
        assert_eq!(*handler_calls.lock().unwrap(), 0);
        assert_eq!(*log.lock().unwrap(), ["outer", "~outer"]);
    }

    #[tokio::test]
    async fn empty_chain_is_just_the_handler() {
        let pipeline: Pipeline<u32, u32> =
            Pipeline::new(Arc::new(|m: u32| async move { Ok::<u32, DispatchError>(m + 1) }), vec![]);
        assert_eq!(pipeline.dispatch(1).await.unwrap(), 2);
    }
}
