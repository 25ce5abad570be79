//! Handles settings for the application. Configuration is read from an
//! optional `settings.toml` and then from `MINDOH__*` environment variables,
//! e.g. `MINDOH__SERVER__PORT=8080`.
//!
//! See `settings.toml` at the repository root for an example.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: Option<String>,
    pub port: u16,
    pub database: Database,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind: None,
            port: 3000,
            database: Database::Sqlite("mindoh.db".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Rates {
    pub primary_url: String,
    pub fallback_url: String,
    pub ttl_secs: u64,
    pub timeout_secs: u64,
}

impl Default for Rates {
    fn default() -> Self {
        Self {
            primary_url: engine::rates::PRIMARY_RATES_URL.to_string(),
            fallback_url: engine::rates::FALLBACK_RATES_URL.to_string(),
            ttl_secs: engine::rates::DEFAULT_TTL.as_secs(),
            timeout_secs: engine::rates::DEFAULT_FETCH_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Mail {
    /// Frontend base URL used in verification and reset links.
    pub app_url: String,
}

impl Default for Mail {
    fn default() -> Self {
        Self {
            app_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub server: Server,
    pub rates: Rates,
    pub mail: Mail,
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("MINDOH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}
