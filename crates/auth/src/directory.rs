//! User status source (layer 9).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use nimbus_core::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Inactive,
    Locked,
    Expired,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("user directory unreachable: {0}")]
pub struct DirectoryUnavailable(pub String);

/// Source of account status for authenticated users. Backed by the identity
/// provider in production; the framework only contracts the lookup.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn status(&self, user_id: UserId) -> Result<UserStatus, DirectoryUnavailable>;
}

#[async_trait]
impl<S> UserDirectory for std::sync::Arc<S>
where
    S: UserDirectory + ?Sized,
{
    async fn status(&self, user_id: UserId) -> Result<UserStatus, DirectoryUnavailable> {
        (**self).status(user_id).await
    }
}

/// Directory with a default status and per-user overrides. Defaults to
/// all-active, which suits deployments where the token issuer already
/// guarantees liveness.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    overrides: RwLock<HashMap<UserId, UserStatus>>,
}

impl StaticUserDirectory {
    pub fn all_active() -> Self {
        Self::default()
    }

    pub fn set_status(&self, user_id: UserId, status: UserStatus) {
        if let Ok(mut overrides) = self.overrides.write() {
            overrides.insert(user_id, status);
        }
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn status(&self, user_id: UserId) -> Result<UserStatus, DirectoryUnavailable> {
        let overrides = self
            .overrides
            .read()
            .map_err(|_| DirectoryUnavailable("lock poisoned".to_string()))?;
        Ok(overrides.get(&user_id).copied().unwrap_or(UserStatus::Active))
    }
}
