//! Per-task tenant stack.
//!
//! The stack lives in a tokio task-local slot, so tasks never share context
//! and pooled worker threads never observe a stale tenant: when the enclosing
//! [`TenantContext::scope`] ends, the slot is torn down with the task. An
//! asynchronous continuation that needs the tenant must carry it explicitly
//! (the event chain restores it from event metadata; the command and query
//! chains take it from the message payload).
//!
//! Every `push` must be paired with exactly one `pop` on every exit path.
//! [`TenantGuard`] pops on drop, which covers early returns, `?`, panics and
//! future cancellation within the task.

use std::cell::RefCell;
use std::future::Future;

use thiserror::Error;

use nimbus_core::TenantId;
use nimbus_observability::metrics;

tokio::task_local! {
    static TENANT_STACK: RefCell<Vec<TenantId>>;
}

/// Data-path failure: a storage or dispatch operation ran without an active
/// tenant. This is an integration error, reported as internal, never as an
/// access-denied response.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("tenant context required but none is set")]
pub struct MissingTenantContext;

/// Failures of context manipulation itself.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The nil UUID is not an acceptable tenant.
    #[error("tenant id must not be blank")]
    BlankTenant,

    /// `push` was called on a task that never entered [`TenantContext::scope`].
    #[error("no tenant context scope is active on this task")]
    NoActiveScope,
}

/// Pops one stack entry when dropped.
///
/// Dropping outside the owning task (e.g. a future moved elsewhere before
/// being dropped) is a no-op; the scope teardown still clears the slot.
#[derive(Debug)]
#[must_use = "dropping the guard immediately pops the tenant again"]
pub struct TenantGuard {
    _private: (),
}

impl Drop for TenantGuard {
    fn drop(&mut self) {
        TenantContext::pop();
    }
}

/// Facade over the current task's tenant stack.
#[derive(Debug)]
pub struct TenantContext;

impl TenantContext {
    /// Run `fut` with a fresh, empty tenant stack.
    ///
    /// Ingress and the projection host wrap each unit of work in a scope; the
    /// slot disappears with the scope, so nothing leaks onto pooled workers.
    /// A non-empty stack at scope exit is counted as a leak.
    pub async fn scope<F>(fut: F) -> F::Output
    where
        F: Future,
    {
        TENANT_STACK
            .scope(RefCell::new(Vec::new()), async move {
                let out = fut.await;
                let depth = TenantContext::depth();
                if depth > 0 {
                    metrics::incr("tenant.context.leak", "");
                    tracing::warn!(depth, "tenant context not fully popped at scope exit");
                    let _ = TENANT_STACK.try_with(|stack| stack.borrow_mut().clear());
                }
                out
            })
            .await
    }

    /// Push a tenant onto the current task's stack.
    ///
    /// Rejects the nil UUID and calls made outside an active scope. The
    /// returned guard pops on drop.
    pub fn push(tenant_id: TenantId) -> Result<TenantGuard, ContextError> {
        if tenant_id.is_nil() {
            return Err(ContextError::BlankTenant);
        }

        TENANT_STACK
            .try_with(|stack| {
                let mut stack = stack.borrow_mut();
                stack.push(tenant_id);
                metrics::incr("tenant.context.push", "");
                tracing::debug!(tenant_id = %tenant_id, depth = stack.len(), "tenant pushed");
            })
            .map_err(|_| ContextError::NoActiveScope)?;

        Ok(TenantGuard { _private: () })
    }

    /// Top of the stack, or `None`. Observational; never fails.
    pub fn current() -> Option<TenantId> {
        TENANT_STACK
            .try_with(|stack| stack.borrow().last().copied())
            .ok()
            .flatten()
    }

    /// Top of the stack, or `MissingTenantContext`. The data path uses this:
    /// without a tenant, storage access is forbidden.
    pub fn require() -> Result<TenantId, MissingTenantContext> {
        match Self::current() {
            Some(tenant_id) => Ok(tenant_id),
            None => {
                metrics::incr("tenant.context.missing", "");
                Err(MissingTenantContext)
            }
        }
    }

    /// Pop one entry. Idempotent on an empty stack and outside a scope.
    pub fn pop() -> Option<TenantId> {
        let popped = TENANT_STACK
            .try_with(|stack| stack.borrow_mut().pop())
            .ok()
            .flatten();
        if popped.is_some() {
            metrics::incr("tenant.context.pop", "");
        }
        popped
    }

    /// Whether the current task has an initialized context slot.
    pub fn in_scope() -> bool {
        TENANT_STACK.try_with(|_| ()).is_ok()
    }

    /// Current stack size (0 outside a scope).
    pub fn depth() -> usize {
        TENANT_STACK
            .try_with(|stack| stack.borrow().len())
            .unwrap_or(0)
    }

    /// Run `fut` in a fresh scope with `tenant_id` pushed; the pop is
    /// guaranteed by guard drop and scope teardown.
    pub async fn with_tenant<F>(tenant_id: TenantId, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        Self::scope(async move {
            let _guard = Self::push(tenant_id)?;
            Ok(fut.await)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(n: u128) -> TenantId {
        TenantId::from_uuid(uuid::Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn current_is_none_outside_scope() {
        assert_eq!(TenantContext::current(), None);
        assert_eq!(TenantContext::depth(), 0);
        assert_eq!(TenantContext::require(), Err(MissingTenantContext));
    }

    #[tokio::test]
    async fn push_outside_scope_is_rejected() {
        assert!(matches!(
            TenantContext::push(tenant(1)),
            Err(ContextError::NoActiveScope)
        ));
    }

    #[tokio::test]
    async fn push_and_pop_inside_scope() {
        TenantContext::scope(async {
            assert_eq!(TenantContext::current(), None);

            let guard = TenantContext::push(tenant(1)).unwrap();
            assert_eq!(TenantContext::current(), Some(tenant(1)));
            assert_eq!(TenantContext::require().unwrap(), tenant(1));
            assert_eq!(TenantContext::depth(), 1);

            drop(guard);
            assert_eq!(TenantContext::current(), None);
            assert_eq!(TenantContext::depth(), 0);
        })
        .await;
    }

    #[tokio::test]
    async fn stack_is_lifo() {
        TenantContext::scope(async {
            let _a = TenantContext::push(tenant(1)).unwrap();
            let b = TenantContext::push(tenant(2)).unwrap();
            assert_eq!(TenantContext::current(), Some(tenant(2)));
            assert_eq!(TenantContext::depth(), 2);

            drop(b);
            assert_eq!(TenantContext::current(), Some(tenant(1)));
        })
        .await;
    }

    #[tokio::test]
    async fn nil_tenant_is_rejected() {
        TenantContext::scope(async {
            assert!(matches!(
                TenantContext::push(TenantId::from_uuid(uuid::Uuid::nil())),
                Err(ContextError::BlankTenant)
            ));
        })
        .await;
    }

    #[tokio::test]
    async fn pop_is_idempotent_on_empty() {
        TenantContext::scope(async {
            assert_eq!(TenantContext::pop(), None);
            assert_eq!(TenantContext::pop(), None);
        })
        .await;
        assert_eq!(TenantContext::pop(), None);
    }

    #[tokio::test]
    async fn guard_pops_on_early_error_path() {
        async fn failing() -> Result<(), &'static str> {
            let _guard = TenantContext::push(tenant(7)).map_err(|_| "push")?;
            Err("handler blew up")
        }

        TenantContext::scope(async {
            assert!(failing().await.is_err());
            assert_eq!(TenantContext::depth(), 0);
        })
        .await;
    }

    #[tokio::test]
    async fn tasks_do_not_share_stacks() {
        TenantContext::scope(async {
            let _guard = TenantContext::push(tenant(1)).unwrap();

            let seen_in_other_task =
                tokio::spawn(async { TenantContext::current() }).await.unwrap();
            assert_eq!(seen_in_other_task, None);

            assert_eq!(TenantContext::current(), Some(tenant(1)));
        })
        .await;
    }

    #[tokio::test]
    async fn unbalanced_push_is_counted_as_leak() {
        let before = nimbus_observability::metrics::counter("tenant.context.leak", "");
        TenantContext::scope(async {
            // Deliberately forget the guard.
            let guard = TenantContext::push(tenant(3)).unwrap();
            std::mem::forget(guard);
        })
        .await;
        let after = nimbus_observability::metrics::counter("tenant.context.leak", "");
        assert_eq!(after, before + 1);

        // The slot was torn down with the scope regardless.
        assert_eq!(TenantContext::depth(), 0);
    }

    #[tokio::test]
    async fn with_tenant_pushes_and_restores() {
        let seen = TenantContext::with_tenant(tenant(9), async { TenantContext::current() })
            .await
            .unwrap();
        assert_eq!(seen, Some(tenant(9)));
        assert_eq!(TenantContext::current(), None);
    }
}
