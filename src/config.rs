//! Configuration management for Salesdesk
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from YAML files and environment variables.

use crate::error::{Result, SalesdeskError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for Salesdesk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Conversation/message store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Suggestion webhook settings
    #[serde(default)]
    pub suggestions: SuggestionConfig,
    /// Query client page sizes, staleness windows and timeouts
    #[serde(default)]
    pub query: QueryConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which store backend serves conversation and message rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Embedded SQLite database
    #[default]
    Sqlite,
    /// Remote PostgREST endpoint (Supabase-style)
    Postgrest,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend type
    #[serde(default)]
    pub backend: StoreBackend,

    /// Base URL of the PostgREST service (e.g. `https://xyz.supabase.co`)
    #[serde(default)]
    pub url: Option<String>,

    /// API key sent as `apikey` and bearer token
    #[serde(default)]
    pub key: Option<String>,

    /// Database schema exposed through PostgREST
    #[serde(default = "default_schema")]
    pub schema: String,

    /// SQLite database file; defaults to the user's data directory
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,

    /// Per-request timeout for the PostgREST backend (seconds)
    #[serde(default = "default_store_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_schema() -> String {
    "assistant".to_string()
}

fn default_store_timeout_seconds() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            key: None,
            schema: default_schema(),
            sqlite_path: None,
            timeout_seconds: default_store_timeout_seconds(),
        }
    }
}

/// Suggestion webhook configuration
///
/// Both `webhook_url` and `auth_token` are optional here: their absence is
/// reported as a configuration error when a suggestion is requested, not
/// when the configuration is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionConfig {
    /// Webhook endpoint URL
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Value sent verbatim in the `Authorization` header
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_webhook_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_webhook_timeout_seconds() -> u64 {
    30
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            auth_token: None,
            timeout_seconds: default_webhook_timeout_seconds(),
        }
    }
}

/// Query client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Conversations per page
    #[serde(default = "default_conversation_page_size")]
    pub conversation_page_size: usize,

    /// Messages per page
    #[serde(default = "default_message_page_size")]
    pub message_page_size: usize,

    /// Freshness window for conversation lists and single conversations (seconds)
    #[serde(default = "default_conversation_stale_seconds")]
    pub conversation_stale_seconds: u64,

    /// Freshness window for message pages (seconds)
    #[serde(default = "default_message_stale_seconds")]
    pub message_stale_seconds: u64,

    /// Upper bound on any single gateway call made by the query client (seconds)
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_conversation_page_size() -> usize {
    25
}

fn default_message_page_size() -> usize {
    30
}

fn default_conversation_stale_seconds() -> u64 {
    30
}

fn default_message_stale_seconds() -> u64 {
    15
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl QueryConfig {
    pub fn conversation_stale_time(&self) -> Duration {
        Duration::from_secs(self.conversation_stale_seconds)
    }

    pub fn message_stale_time(&self) -> Duration {
        Duration::from_secs(self.message_stale_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            conversation_page_size: default_conversation_page_size(),
            message_page_size: default_message_page_size(),
            conversation_stale_seconds: default_conversation_stale_seconds(),
            message_stale_seconds: default_message_stale_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,

    /// Log file path (if None, STDOUT only)
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment overrides
    ///
    /// A missing file is not an error: defaults are used and environment
    /// variables are still applied.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SalesdeskError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| SalesdeskError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(backend) = std::env::var("SALESDESK_STORE_BACKEND") {
            match backend.trim().to_lowercase().as_str() {
                "sqlite" => self.store.backend = StoreBackend::Sqlite,
                "postgrest" => self.store.backend = StoreBackend::Postgrest,
                _ => tracing::warn!("Invalid value for SALESDESK_STORE_BACKEND: {}", backend),
            }
        }

        if let Ok(url) = std::env::var("SALESDESK_STORE_URL") {
            self.store.url = Some(url);
            tracing::debug!("Env override: SALESDESK_STORE_URL");
        }

        if let Ok(key) = std::env::var("SALESDESK_STORE_KEY") {
            self.store.key = Some(key);
        }

        if let Ok(schema) = std::env::var("SALESDESK_STORE_SCHEMA") {
            self.store.schema = schema;
        }

        if let Ok(db_path) = std::env::var("SALESDESK_DB_PATH") {
            tracing::debug!(db_path = %db_path, "Env override: SALESDESK_DB_PATH");
            self.store.sqlite_path = Some(PathBuf::from(db_path));
        }

        if let Ok(url) = std::env::var("SALESDESK_WEBHOOK_URL") {
            self.suggestions.webhook_url = Some(url);
            tracing::debug!("Env override: SALESDESK_WEBHOOK_URL");
        }

        if let Ok(token) = std::env::var("SALESDESK_WEBHOOK_TOKEN") {
            self.suggestions.auth_token = Some(token);
        }

        if let Ok(timeout) = std::env::var("SALESDESK_WEBHOOK_TIMEOUT_SECONDS") {
            match timeout.parse::<u64>() {
                Ok(v) => {
                    self.suggestions.timeout_seconds = v;
                    tracing::debug!(
                        timeout_seconds = v,
                        "Env override: SALESDESK_WEBHOOK_TIMEOUT_SECONDS"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for SALESDESK_WEBHOOK_TIMEOUT_SECONDS: {}",
                        timeout
                    );
                }
            }
        }

        if let Ok(level) = std::env::var("SALESDESK_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate the configuration
    ///
    /// Webhook settings are deliberately not checked here; see
    /// [`SuggestionConfig`].
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Postgrest {
            if self.store.url.as_deref().map_or(true, str::is_empty) {
                return Err(SalesdeskError::Config(
                    "store.url is required for the postgrest backend".to_string(),
                )
                .into());
            }
            if self.store.key.as_deref().map_or(true, str::is_empty) {
                return Err(SalesdeskError::Config(
                    "store.key is required for the postgrest backend".to_string(),
                )
                .into());
            }
        }

        if self.store.timeout_seconds == 0 {
            return Err(SalesdeskError::Config(
                "store.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        for (name, size) in [
            ("query.conversation_page_size", self.query.conversation_page_size),
            ("query.message_page_size", self.query.message_page_size),
        ] {
            if size == 0 || size > 1000 {
                return Err(SalesdeskError::Config(format!(
                    "{} must be between 1 and 1000",
                    name
                ))
                .into());
            }
        }

        if self.query.request_timeout_seconds == 0 {
            return Err(SalesdeskError::Config(
                "query.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.suggestions.timeout_seconds == 0 {
            return Err(SalesdeskError::Config(
                "suggestions.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
