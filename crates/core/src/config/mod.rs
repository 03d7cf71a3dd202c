//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (RECEIPT_SW_*)
//! 2. TOML config file (if RECEIPT_SW_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::store::GenerationNames;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (RECEIPT_SW_*)
/// 2. TOML config file (if RECEIPT_SW_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database holding cache generations and pending uploads.
    ///
    /// Set via RECEIPT_SW_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Origin the worker is registered for. Relative request paths resolve
    /// against it and responses from it are treated as same-origin.
    ///
    /// Set via RECEIPT_SW_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via RECEIPT_SW_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via RECEIPT_SW_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum response body bytes accepted from the network.
    ///
    /// Set via RECEIPT_SW_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Prefix shared by every generation name.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Version suffix of the current generations.
    ///
    /// Bumping it makes the next activation evict every older generation.
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Resources fetched into the static generation on install.
    #[serde(default = "default_static_manifest")]
    pub static_manifest: Vec<String>,

    /// Path prefixes that are always sent to the network.
    #[serde(default = "default_api_prefixes")]
    pub api_prefixes: Vec<String>,

    /// Page served for HTML navigations that miss the cache while offline.
    #[serde(default = "default_offline_page")]
    pub offline_page: String,

    /// Tag of the reconnect signal that drains the upload queue.
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,

    /// Endpoint receiving multipart receipt uploads.
    #[serde(default = "default_upload_path")]
    pub upload_path: String,

    /// Liveness endpoint probed at startup.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Request headers that take part in the cache key.
    ///
    /// Set via RECEIPT_SW_VARY_HEADERS environment variable (array syntax, e.g. `[accept]`).
    #[serde(default)]
    pub vary_headers: Vec<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./receipt-sw.sqlite")
}

fn default_origin() -> String {
    "http://localhost:8000".into()
}

fn default_user_agent() -> String {
    "receipt-sw/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    10_485_760 // 10MB
}

fn default_cache_prefix() -> String {
    "receipt-scanner".into()
}

fn default_cache_version() -> String {
    "v1.0.0".into()
}

fn default_static_manifest() -> Vec<String> {
    vec![
        "/".into(),
        "/index.html".into(),
        "/styles.css".into(),
        "/app.js".into(),
        "/manifest.json".into(),
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css".into(),
    ]
}

fn default_api_prefixes() -> Vec<String> {
    vec!["/analyze".into(), "/health".into()]
}

fn default_offline_page() -> String {
    "/offline.html".into()
}

fn default_sync_tag() -> String {
    "background-sync".into()
}

fn default_upload_path() -> String {
    "/analyze/upload".into()
}

fn default_health_path() -> String {
    "/health".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            max_bytes: default_max_bytes(),
            cache_prefix: default_cache_prefix(),
            cache_version: default_cache_version(),
            static_manifest: default_static_manifest(),
            api_prefixes: default_api_prefixes(),
            offline_page: default_offline_page(),
            sync_tag: default_sync_tag(),
            upload_path: default_upload_path(),
            health_path: default_health_path(),
            vary_headers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Names of the generations recognized by this version.
    pub fn generation_names(&self) -> GenerationNames {
        GenerationNames::new(&self.cache_prefix, &self.cache_version)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `RECEIPT_SW_`
    /// 2. TOML file from `RECEIPT_SW_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("RECEIPT_SW_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("RECEIPT_SW_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
