use crate::error::{AppError, Result};
use crate::store::{CachedResponse, IdempotencyStore};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

/// Redis-backed store for shared deployments.
///
/// Records are serialized to JSON under `{prefix}:{key}`; admission counters
/// live under `{prefix}:rate:{key}` and use `INCR` with an `EXPIRE` set on
/// the first increment, so increment-and-compare is atomic on the backend.
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
    rate_window: Duration,
}

impl RedisStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>, rate_window: Duration) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            rate_window,
        }
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    fn rate_key(&self, key: &str) -> String {
        format!("{}:rate:{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)
    }

    /// Verifies the backend is reachable.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for RedisStore {
    async fn lookup(&self, key: &str) -> Result<Option<CachedResponse>> {
        let mut conn = self.connection().await?;

        let value: Option<String> = conn
            .get(self.record_key(key))
            .await
            .map_err(AppError::Redis)?;

        match value {
            Some(json) => {
                let cached: CachedResponse = serde_json::from_str(&json)?;
                Ok(Some(cached))
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        key: &str,
        response: CachedResponse,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut conn = self.connection().await?;
        let record_key = self.record_key(key);
        let json = serde_json::to_string(&response)?;

        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(&record_key, json, ttl.as_secs().max(1))
                    .await
                    .map_err(AppError::Redis)?;
            }
            None => {
                let _: () = conn
                    .set(&record_key, json)
                    .await
                    .map_err(AppError::Redis)?;
            }
        }

        Ok(())
    }

    async fn admit(&self, key: &str, limit: u32) -> Result<bool> {
        let mut conn = self.connection().await?;
        let rate_key = self.rate_key(key);

        let count: i64 = conn.incr(&rate_key, 1).await.map_err(AppError::Redis)?;

        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(&rate_key)
                .arg(self.rate_window.as_secs().max(1))
                .query_async(&mut conn)
                .await
                .map_err(AppError::Redis)?;
        }

        Ok(count <= i64::from(limit))
    }
}
