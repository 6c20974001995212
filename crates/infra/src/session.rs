//! Tenant-bound storage sessions.
//!
//! Every database-touching unit of work binds the ambient tenant to the
//! session variable the row-filter predicate reads. The binding is set with
//! a parameterised `set_config(..., true)`, so it is scoped to the
//! transaction (not the connection) and disappears on commit or rollback.
//! Queries issued without a binding receive zero rows and inserts fail -
//! that is the last line of defence, enforced by the database itself.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::instrument;

use nimbus_core::{TenantConfig, TenantId};
use nimbus_dispatch::{DispatchError, SessionBinder, SessionBinding};
use nimbus_tenant::{MissingTenantContext, TenantContext};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    MissingTenant(#[from] MissingTenantContext),

    #[error("session binding failed: {0}")]
    Storage(String),
}

impl From<SessionError> for DispatchError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::MissingTenant(err) => DispatchError::MissingTenant(err),
            SessionError::Storage(msg) => DispatchError::Storage(msg),
        }
    }
}

/// Bind `tenant_id` to `variable` for the lifetime of `tx`.
pub async fn bind_tenant(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    variable: &str,
) -> Result<(), sqlx::Error> {
    // `is_local = true`: the setting dies with the transaction.
    sqlx::query("SELECT set_config($1, $2, true)")
        .bind(variable)
        .bind(tenant_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Factory for tenant-bound transactions.
#[derive(Debug, Clone)]
pub struct TenantSession {
    pool: PgPool,
    variable: String,
}

impl TenantSession {
    pub fn new(pool: PgPool, config: &TenantConfig) -> Self {
        Self {
            pool,
            variable: config.session_variable.clone(),
        }
    }

    pub fn session_variable(&self) -> &str {
        &self.variable
    }

    /// Begin a transaction with the ambient tenant bound. Fails closed when
    /// no tenant is active.
    #[instrument(skip(self), err)]
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, SessionError> {
        let tenant_id = TenantContext::require()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        bind_tenant(&mut tx, tenant_id, &self.variable)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        Ok(tx)
    }

    /// As [`TenantSession::begin`], for read-only units of work (the query
    /// chain).
    #[instrument(skip(self), err)]
    pub async fn begin_read_only(&self) -> Result<Transaction<'static, Postgres>, SessionError> {
        let mut tx = self.begin().await?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        Ok(tx)
    }
}

/// [`SessionBinder`] for the query chain over Postgres.
///
/// The bind itself is a fail-closed tenant check; the physical `set_config`
/// happens inside [`TenantSession::begin`] on the data path, because the
/// binding must live on the very transaction the repository uses.
#[derive(Debug, Clone)]
pub struct PgSessionBinder {
    session: TenantSession,
}

impl PgSessionBinder {
    pub fn new(session: TenantSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &TenantSession {
        &self.session
    }
}

#[async_trait]
impl SessionBinder for PgSessionBinder {
    async fn bind(&self) -> Result<SessionBinding, DispatchError> {
        let tenant_id = TenantContext::require().map_err(DispatchError::MissingTenant)?;
        Ok(SessionBinding { tenant_id })
    }
}
