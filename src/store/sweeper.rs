use crate::store::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;

/// Background sweep for the in-memory store, keeping memory bounded when
/// traffic is too sparse for lazy eviction to keep up.
pub struct ExpirySweeper {
    store: Arc<InMemoryStore>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<InMemoryStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Runs a single sweep. Returns the number of entries removed.
    pub async fn run_once(&self) -> usize {
        self.store.sweep().await
    }

    /// Starts the sweep loop in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);

            loop {
                interval.tick().await;

                let removed = self.store.sweep().await;
                if removed > 0 {
                    tracing::info!("swept {} expired idempotency entries", removed);
                }
            }
        })
    }
}
