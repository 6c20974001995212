//! Revoked-token set.
//!
//! The set is external and eventually consistent; the only contract the
//! framework relies on is fail-closed behavior when it cannot be reached.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// The revocation backend could not answer. The validator treats this as
/// deny; any other policy would defeat emergency revocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("revocation set unreachable: {0}")]
pub struct RevocationUnavailable(pub String);

#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn is_revoked(&self, jti: &str) -> Result<bool, RevocationUnavailable>;
}

#[async_trait]
impl<S> RevocationStore for std::sync::Arc<S>
where
    S: RevocationStore + ?Sized,
{
    async fn is_revoked(&self, jti: &str) -> Result<bool, RevocationUnavailable> {
        (**self).is_revoked(jti).await
    }
}

/// In-memory revocation set with per-entry TTL, for tests and single-node
/// deployments.
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `jti` revoked until `ttl` from now.
    pub fn revoke(&self, jti: impl Into<String>, ttl: Duration) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(jti.into(), Utc::now() + ttl);
        }
    }

    /// Remove `jti` from the set (e.g. after the token itself expired).
    pub fn clear(&self, jti: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(jti);
        }
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn is_revoked(&self, jti: &str) -> Result<bool, RevocationUnavailable> {
        let now = Utc::now();

        // Drop expired entries lazily on lookup.
        let mut entries = self
            .entries
            .write()
            .map_err(|_| RevocationUnavailable("lock poisoned".to_string()))?;
        entries.retain(|_, expires_at| *expires_at > now);

        Ok(entries.contains_key(jti))
    }
}

/// Test double simulating an unreachable backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRevocationStore;

#[async_trait]
impl RevocationStore for UnavailableRevocationStore {
    async fn is_revoked(&self, _jti: &str) -> Result<bool, RevocationUnavailable> {
        Err(RevocationUnavailable("simulated outage".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn revoke_and_clear_round_trip() {
        let store = InMemoryRevocationStore::new();
        assert!(!store.is_revoked("jti-1").await.unwrap());

        store.revoke("jti-1", Duration::hours(1));
        assert!(store.is_revoked("jti-1").await.unwrap());

        store.clear("jti-1");
        assert!(!store.is_revoked("jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_fall_out() {
        let store = InMemoryRevocationStore::new();
        store.revoke("jti-2", Duration::seconds(-1));
        assert!(!store.is_revoked("jti-2").await.unwrap());
    }
}
