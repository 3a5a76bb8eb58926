use crate::capture::{tee_response, CaptureOutcome};
use crate::error::{ProblemDetails, Result};
use crate::key::IdempotencyKey;
use crate::observability::{get_metrics, LatencyTimer};
use crate::store::IdempotencyStore;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// What to do when a store call fails.
///
/// Applied to `admit`, `lookup`, and `save` alike; the stage never mixes
/// behaviors across call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// The surrounding request fails with the store error.
    FailRequest,
    /// The call degrades to pass-through-without-caching, logged and counted.
    Bypass,
}

/// Configuration for the idempotency stage, passed in explicitly at
/// construction.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Request header carrying the client key.
    pub header_name: String,
    /// Retention for cached responses. `None` keeps entries until the store
    /// evicts them on its own.
    pub default_expiration: Option<Duration>,
    /// Maximum admissions per key per window. `None` disables the check.
    pub rate_limit: Option<u32>,
    /// Ceiling on captured body size; larger responses are delivered but
    /// not cached.
    pub max_captured_body_bytes: usize,
    /// Serialize executions per key so concurrent retries sharing a key run
    /// downstream at most once. Off by default: losers of the race may each
    /// execute downstream, with the last `save` winning.
    pub single_flight: bool,
    pub store_failure: StoreFailurePolicy,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            header_name: "x-idempotency-key".to_string(),
            default_expiration: Some(Duration::from_secs(86400)),
            rate_limit: None,
            max_captured_body_bytes: 256 * 1024,
            single_flight: false,
            store_failure: StoreFailurePolicy::FailRequest,
        }
    }
}

/// Per-key async locks for single-flight execution.
struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > 1024 {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

/// The idempotency coordination stage.
///
/// Holds no cross-request state beyond its configuration and, when
/// `single_flight` is enabled, the per-key lock table; every cached record
/// and admission counter lives behind the store.
pub struct IdempotencyCoordinator {
    store: Option<Arc<dyn IdempotencyStore>>,
    config: IdempotencyConfig,
    locks: KeyLocks,
}

impl IdempotencyCoordinator {
    pub fn new(store: Option<Arc<dyn IdempotencyStore>>, config: IdempotencyConfig) -> Self {
        Self {
            store,
            config,
            locks: KeyLocks::new(),
        }
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Applies the configured failure policy to a store call result.
    fn absorb<T>(&self, result: Result<T>, fallback: T, op: &str) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => match self.config.store_failure {
                StoreFailurePolicy::FailRequest => Err(err),
                StoreFailurePolicy::Bypass => {
                    get_metrics().record_store_error(op);
                    tracing::warn!("store {} failed, bypassing: {}", op, err);
                    Ok(fallback)
                }
            },
        }
    }

    /// Runs one request through the stage.
    ///
    /// Requests without a usable key, and every request when no store is
    /// wired in, go straight to `downstream` untouched. Otherwise the stage
    /// checks admission, replays a cached response when one exists, and on a
    /// miss executes `downstream` once, capturing and persisting its output.
    pub async fn handle<F, Fut>(&self, req: Request, downstream: F) -> Result<Response>
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let key = req
            .headers()
            .get(self.config.header_name.as_str())
            .and_then(|value| value.to_str().ok())
            .and_then(IdempotencyKey::from_header_value);

        let Some(key) = key else {
            get_metrics().record_passthrough();
            return Ok(downstream(req).await);
        };

        let Some(store) = self.store.clone() else {
            get_metrics().record_passthrough();
            return Ok(downstream(req).await);
        };

        let storage_key = key.storage_key();

        if let Some(limit) = self.config.rate_limit {
            let admitted = self.absorb(store.admit(&storage_key, limit).await, true, "admit")?;
            if !admitted {
                get_metrics().record_rate_limited();
                tracing::warn!(key = %key.masked(), "admission window exhausted");
                return Ok(ProblemDetails::rate_limit_exceeded().into_response());
            }
        }

        // Held across downstream and save so concurrent retries sharing the
        // key block here, then find the winner's record on re-lookup.
        let _guard = if self.config.single_flight {
            Some(self.locks.acquire(&storage_key).await)
        } else {
            None
        };

        let timer = LatencyTimer::new();
        let cached = self.absorb(store.lookup(&storage_key).await, None, "lookup")?;
        get_metrics().record_lookup_latency(timer.elapsed_ms(), cached.is_some());

        if let Some(cached) = cached {
            get_metrics().record_replay();
            tracing::debug!(
                key = %key.masked(),
                status = cached.status_code,
                "replaying cached response"
            );
            return Ok(cached.to_response());
        }

        let response = downstream(req).await;

        let (response, outcome) =
            tee_response(response, self.config.max_captured_body_bytes).await;

        match outcome {
            CaptureOutcome::Captured(captured) => {
                self.absorb(
                    store
                        .save(&storage_key, captured.into_cached(), self.config.default_expiration)
                        .await,
                    (),
                    "save",
                )?;
                get_metrics().record_execution();
            }
            CaptureOutcome::Overflowed { limit } => {
                get_metrics().record_capture_overflow();
                tracing::warn!(
                    key = %key.masked(),
                    limit,
                    "response body exceeded capture ceiling, not cached"
                );
            }
            CaptureOutcome::Errored => {
                tracing::warn!(key = %key.masked(), "downstream body errored, not cached");
            }
        }

        Ok(response)
    }
}

/// axum adapter for [`IdempotencyCoordinator::handle`], for use with
/// `middleware::from_fn_with_state`.
pub async fn idempotency(
    State(coordinator): State<Arc<IdempotencyCoordinator>>,
    req: Request,
    next: Next,
) -> Response {
    match coordinator.handle(req, |req| next.run(req)).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CachedResponse, MockIdempotencyStore};
    use axum::body::{to_bytes, Body};
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request_with_key(key: &str) -> Request {
        Request::builder()
            .uri("/payments")
            .header("x-idempotency-key", key)
            .body(Body::empty())
            .unwrap()
    }

    fn coordinator_with(
        mock: MockIdempotencyStore,
        config: IdempotencyConfig,
    ) -> IdempotencyCoordinator {
        IdempotencyCoordinator::new(Some(Arc::new(mock)), config)
    }

    fn counting_downstream(
        calls: Arc<AtomicUsize>,
    ) -> impl FnOnce(Request) -> std::future::Ready<Response> {
        move |_req| {
            calls.fetch_add(1, Ordering::SeqCst);
            let mut response = Response::new(Body::from("{\"id\":1}"));
            *response.status_mut() = StatusCode::CREATED;
            std::future::ready(response)
        }
    }

    #[tokio::test]
    async fn test_missing_key_never_touches_store() {
        let mut mock = MockIdempotencyStore::new();
        mock.expect_lookup().times(0);
        mock.expect_save().times(0);
        mock.expect_admit().times(0);

        let coordinator = coordinator_with(mock, IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let req = Request::builder()
            .uri("/payments")
            .body(Body::empty())
            .unwrap();
        let response = coordinator
            .handle(req, counting_downstream(Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blank_key_is_treated_as_absent() {
        let mut mock = MockIdempotencyStore::new();
        mock.expect_lookup().times(0);
        mock.expect_save().times(0);
        mock.expect_admit().times(0);

        let coordinator = coordinator_with(mock, IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let response = coordinator
            .handle(request_with_key("   "), counting_downstream(Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_store_degrades_to_passthrough() {
        let coordinator = IdempotencyCoordinator::new(
            None,
            IdempotencyConfig {
                rate_limit: Some(1),
                ..IdempotencyConfig::default()
            },
        );
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let response = coordinator
                .handle(request_with_key("abc"), counting_downstream(Arc::clone(&calls)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_denied_admission_short_circuits() {
        let mut mock = MockIdempotencyStore::new();
        mock.expect_admit()
            .withf(|_key, limit| *limit == 2)
            .times(1)
            .returning(|_, _| Ok(false));
        mock.expect_lookup().times(0);
        mock.expect_save().times(0);

        let coordinator = coordinator_with(
            mock,
            IdempotencyConfig {
                rate_limit: Some(2),
                ..IdempotencyConfig::default()
            },
        );
        let calls = Arc::new(AtomicUsize::new(0));

        let response = coordinator
            .handle(request_with_key("abc"), counting_downstream(Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let problem: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(problem["title"], "Rate Limit Exceeded");
        assert_eq!(problem["status"], 429);
    }

    #[tokio::test]
    async fn test_hit_replays_without_invoking_downstream() {
        let storage_key = IdempotencyKey::from_header_value("xyz")
            .unwrap()
            .storage_key();

        let mut mock = MockIdempotencyStore::new();
        mock.expect_lookup()
            .withf(move |key| key == storage_key)
            .times(1)
            .returning(|_| Ok(Some(CachedResponse::new(201, b"{\"id\":1}".to_vec()))));
        mock.expect_save().times(0);

        let coordinator = coordinator_with(mock, IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let response = coordinator
            .handle(request_with_key("xyz"), counting_downstream(Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\"id\":1}");
    }

    #[tokio::test]
    async fn test_miss_executes_once_and_saves_with_configured_ttl() {
        let mut mock = MockIdempotencyStore::new();
        mock.expect_lookup().times(1).returning(|_| Ok(None));
        mock.expect_save()
            .withf(|_key, response, ttl| {
                response.status_code == 201
                    && response.body == b"{\"id\":1}".to_vec()
                    && *ttl == Some(Duration::from_secs(600))
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let coordinator = coordinator_with(
            mock,
            IdempotencyConfig {
                default_expiration: Some(Duration::from_secs(600)),
                ..IdempotencyConfig::default()
            },
        );
        let calls = Arc::new(AtomicUsize::new(0));

        let response = coordinator
            .handle(request_with_key("xyz"), counting_downstream(Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_response_is_delivered_but_not_saved() {
        let mut mock = MockIdempotencyStore::new();
        mock.expect_lookup().times(1).returning(|_| Ok(None));
        mock.expect_save().times(0);

        let coordinator = coordinator_with(
            mock,
            IdempotencyConfig {
                max_captured_body_bytes: 4,
                ..IdempotencyConfig::default()
            },
        );

        let response = coordinator
            .handle(request_with_key("big"), |_req| {
                std::future::ready(Response::new(Body::from("well over four bytes")))
            })
            .await
            .unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"well over four bytes");
    }

    #[tokio::test]
    async fn test_fail_request_policy_propagates_store_errors() {
        let mut mock = MockIdempotencyStore::new();
        mock.expect_lookup()
            .times(1)
            .returning(|_| Err(crate::error::AppError::Validation("down".to_string())));

        let coordinator = coordinator_with(mock, IdempotencyConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let result = coordinator
            .handle(request_with_key("abc"), counting_downstream(Arc::clone(&calls)))
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bypass_policy_degrades_every_store_call() {
        let mut mock = MockIdempotencyStore::new();
        mock.expect_admit()
            .times(1)
            .returning(|_, _| Err(crate::error::AppError::Validation("down".to_string())));
        mock.expect_lookup()
            .times(1)
            .returning(|_| Err(crate::error::AppError::Validation("down".to_string())));
        mock.expect_save()
            .times(1)
            .returning(|_, _, _| Err(crate::error::AppError::Validation("down".to_string())));

        let coordinator = coordinator_with(
            mock,
            IdempotencyConfig {
                rate_limit: Some(1),
                store_failure: StoreFailurePolicy::Bypass,
                ..IdempotencyConfig::default()
            },
        );
        let calls = Arc::new(AtomicUsize::new(0));

        let response = coordinator
            .handle(request_with_key("abc"), counting_downstream(Arc::clone(&calls)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
