use crate::error::Result;
use crate::store::{CachedResponse, IdempotencyStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Counters for monitoring the reference store.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub denials: AtomicU64,
}

impl StoreStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denial(&self) {
        self.denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn get_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn get_misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn get_evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

struct StoredEntry {
    response: CachedResponse,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(deadline) if now > deadline)
    }
}

struct RateWindow {
    count: u32,
    window_start: DateTime<Utc>,
}

/// In-memory reference store.
///
/// Entries and admission counters live in two maps behind async mutexes.
/// Expired state is evicted lazily on access; `sweep` (or the background
/// [`ExpirySweeper`](crate::store::ExpirySweeper)) bounds memory between
/// accesses. Admission uses a fixed window of `rate_window` length, reset
/// the first time a call lands past the window boundary.
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    counters: Mutex<HashMap<String, RateWindow>>,
    rate_window: chrono::Duration,
    stats: Arc<StoreStats>,
}

impl InMemoryStore {
    pub fn new(rate_window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            rate_window: chrono::Duration::from_std(rate_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            stats: Arc::new(StoreStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<StoreStats> {
        Arc::clone(&self.stats)
    }

    /// Number of live cached entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drops every expired entry and every admission window whose boundary
    /// has elapsed. Returns the number of cached entries removed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();

        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        drop(entries);

        for _ in 0..removed {
            self.stats.record_eviction();
        }

        let mut counters = self.counters.lock().await;
        let window = self.rate_window;
        counters.retain(|_, w| now.signed_duration_since(w.window_start) < window);

        removed
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn lookup(&self, key: &str) -> Result<Option<CachedResponse>> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                self.stats.record_eviction();
                self.stats.record_miss();
                Ok(None)
            }
            Some(entry) => {
                self.stats.record_hit();
                Ok(Some(entry.response.clone()))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn save(
        &self,
        key: &str,
        response: CachedResponse,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let expires_at = ttl
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|d| Utc::now() + d);

        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            StoredEntry {
                response,
                expires_at,
            },
        );
        Ok(())
    }

    async fn admit(&self, key: &str, limit: u32) -> Result<bool> {
        let now = Utc::now();
        let mut counters = self.counters.lock().await;

        let count = match counters.get_mut(key) {
            Some(window)
                if now.signed_duration_since(window.window_start) < self.rate_window =>
            {
                window.count += 1;
                window.count
            }
            _ => {
                counters.insert(
                    key.to_string(),
                    RateWindow {
                        count: 1,
                        window_start: now,
                    },
                );
                1
            }
        };

        let admitted = count <= limit;
        if !admitted {
            self.stats.record_denial();
        }
        Ok(admitted)
    }
}
