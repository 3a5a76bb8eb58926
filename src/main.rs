use idempotency_gate::api::{create_router, AppState};
use idempotency_gate::config::Settings;
use idempotency_gate::coordinator::IdempotencyCoordinator;
use idempotency_gate::observability::{init_logging, init_metrics, LogConfig, LogFormat};
use idempotency_gate::pipeline::CorrelationConfig;
use idempotency_gate::store::{ExpirySweeper, IdempotencyStore, InMemoryStore, RedisStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;

    init_logging(&LogConfig {
        level: settings.application.log_level.clone(),
        format: LogFormat::from(settings.application.log_format.as_str()),
        include_target: true,
    });
    info!("Configuration loaded");

    let metrics_handle = init_metrics();

    let rate_window = settings.idempotency.rate_window();
    let (store, redis_client): (Option<Arc<dyn IdempotencyStore>>, Option<redis::Client>) =
        if settings.redis.enabled {
            info!("Connecting to Redis at {}...", settings.redis.url);
            let client = redis::Client::open(settings.redis.url.clone())?;
            let store = RedisStore::new(
                client.clone(),
                settings.idempotency.key_prefix.clone(),
                rate_window,
            );
            store.ping().await?;
            info!("Redis connection established");
            (Some(Arc::new(store)), Some(client))
        } else {
            info!("Using in-memory idempotency store");
            let store = Arc::new(InMemoryStore::new(rate_window));
            ExpirySweeper::new(Arc::clone(&store), Duration::from_secs(60)).start();
            (Some(store as Arc<dyn IdempotencyStore>), None)
        };

    let coordinator = Arc::new(IdempotencyCoordinator::new(
        store.clone(),
        settings.idempotency.to_config(),
    ));

    let state = AppState::new(store, redis_client).with_metrics(metrics_handle);
    let router = create_router(state, coordinator, CorrelationConfig::default());

    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", settings.application.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router).await?;

    Ok(())
}
