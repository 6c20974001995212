//! Redis-backed counters and revocation set (feature `redis`).
//!
//! Rate-limit counters use a two-bucket sliding window: per-second buckets
//! under the tenant key, the previous bucket weighted by how much of it
//! still overlaps the window. Counter unavailability degrades gracefully at
//! the interceptor (DoS control); revocation unavailability fails closed at
//! the validator (correctness control).

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;

use nimbus_auth::{RevocationStore, RevocationUnavailable};
use nimbus_dispatch::{RateLimitUnavailable, RateLimiter};

/// Sliding-window rate limiter over Redis `INCR`/`EXPIRE`.
#[derive(Debug, Clone)]
pub struct RedisRateLimiter {
    client: redis::Client,
    limit: u32,
}

impl RedisRateLimiter {
    pub fn new(redis_url: impl AsRef<str>, limit: u32) -> Result<Self, RateLimitUnavailable> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RateLimitUnavailable(e.to_string()))?;
        Ok(Self { client, limit })
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn try_acquire(&self, key: &str) -> Result<bool, RateLimitUnavailable> {
        let unavailable = |e: redis::RedisError| RateLimitUnavailable(e.to_string());

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;

        let now_millis = Utc::now().timestamp_millis();
        let second = now_millis / 1000;
        let elapsed_millis = (now_millis % 1000) as u64;

        let current_key = format!("{key}:{second}");
        let previous_key = format!("{key}:{}", second - 1);

        let count: u64 = conn.incr(&current_key, 1u64).await.map_err(unavailable)?;
        if count == 1 {
            // Keep the bucket around long enough to serve as "previous".
            let _: () = conn.expire(&current_key, 2).await.map_err(unavailable)?;
        }

        let previous: Option<u64> = conn.get(&previous_key).await.map_err(unavailable)?;
        let previous_weight =
            previous.unwrap_or(0) as f64 * (1000 - elapsed_millis) as f64 / 1000.0;
        let windowed = previous_weight + count as f64;

        Ok(windowed <= self.limit as f64)
    }
}

/// Revocation set over Redis, entries expiring with their TTL.
#[derive(Debug, Clone)]
pub struct RedisRevocationStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisRevocationStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, RevocationUnavailable> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RevocationUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            key_prefix: "auth:revoked:".to_string(),
        })
    }

    fn key(&self, jti: &str) -> String {
        format!("{}{jti}", self.key_prefix)
    }

    /// Mark `jti` revoked for `ttl_seconds`.
    pub async fn revoke(&self, jti: &str, ttl_seconds: u64) -> Result<(), RevocationUnavailable> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RevocationUnavailable(e.to_string()))?;

        let _: () = conn
            .set_ex(self.key(jti), 1u8, ttl_seconds)
            .await
            .map_err(|e| RevocationUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Remove `jti` from the set.
    pub async fn clear(&self, jti: &str) -> Result<(), RevocationUnavailable> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RevocationUnavailable(e.to_string()))?;

        let _: () = conn
            .del(self.key(jti))
            .await
            .map_err(|e| RevocationUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn is_revoked(&self, jti: &str) -> Result<bool, RevocationUnavailable> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RevocationUnavailable(e.to_string()))?;

        conn.exists(self.key(jti))
            .await
            .map_err(|e| RevocationUnavailable(e.to_string()))
    }
}
