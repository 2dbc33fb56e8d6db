use crate::sync::SyncSettings;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Batch endpoint. Without one, batches are applied to the local database.
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub interval_secs: u64,
    pub flush_every: usize,
    pub debounce_ms: i64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub user_id: Option<String>,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Reads `.env`, then `config/<APP_ENV>.toml`, then `STUDY__*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        let settings = Self::defaults()?
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("STUDY")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }

    /// Parses a TOML document over the defaults.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("database.path", "study.sqlite3")?
            .set_default("sync.interval_secs", 15)?
            .set_default("sync.flush_every", 5)?
            .set_default("sync.debounce_ms", 50)?
            .set_default("sync.timeout_secs", 10)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            interval: Duration::from_secs(self.sync.interval_secs.max(1)),
            flush_every: self.sync.flush_every.max(1),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.timeout_secs)
    }
}
