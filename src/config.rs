use crate::coordinator::{IdempotencyConfig, StoreFailurePolicy};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub redis: RedisSettings,
    pub idempotency: IdempotencySettings,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationSettings {
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
}

#[derive(Debug, Deserialize)]
pub struct RedisSettings {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct IdempotencySettings {
    pub header_name: String,
    pub key_prefix: String,
    pub default_expiration_secs: Option<u64>,
    pub rate_limit: Option<u32>,
    pub max_captured_body_bytes: usize,
    pub single_flight: bool,
    pub store_failure: StoreFailurePolicy,
}

impl IdempotencySettings {
    pub fn to_config(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            header_name: self.header_name.clone(),
            default_expiration: self.default_expiration_secs.map(Duration::from_secs),
            rate_limit: self.rate_limit,
            max_captured_body_bytes: self.max_captured_body_bytes,
            single_flight: self.single_flight,
            store_failure: self.store_failure,
        }
    }

    /// Admission window length, matching the configured retention. Falls
    /// back to one minute when entries never expire.
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.default_expiration_secs.unwrap_or(60))
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
