pub mod memory;
pub mod redis;
pub mod sweeper;

pub use memory::{InMemoryStore, StoreStats};
pub use redis::RedisStore;
pub use sweeper::ExpirySweeper;

use crate::error::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Response captured from a completed execution, replayed verbatim on
/// retries. Immutable once stored; a retried `save` overwrites the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(status_code: u16, body: Vec<u8>) -> Self {
        Self {
            status_code,
            body,
            captured_at: Utc::now(),
        }
    }

    /// Rebuilds the stored response exactly as it was first delivered.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        response
    }
}

/// Contract the coordinator requires of a key-value backend.
///
/// `lookup` must treat never-seen keys as a normal absence, not an error.
/// `save` overwrites; a `None` ttl means the entry is retained until the
/// caller removes it. `admit` counts admissions per key in a fixed window
/// whose length is set at store construction; the first `limit` calls in a
/// window return `true` and later ones `false` until the window elapses.
/// All three must be safe under concurrent invocation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<CachedResponse>>;

    async fn save(
        &self,
        key: &str,
        response: CachedResponse,
        ttl: Option<Duration>,
    ) -> Result<()>;

    async fn admit(&self, key: &str, limit: u32) -> Result<bool>;
}
