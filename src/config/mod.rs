//! Configuration management for punchup
//!
//! Configuration comes from a TOML file or from `PUNCHUP_*` environment
//! variables. Every section has defaults except `processing`, whose batch
//! window must always be supplied.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::collection::{CollectionOptions, DispatcherSettings};
use crate::processing::ProcessingOptions;
use crate::scheduler::{SchedulingOptions, TriggerConfig};
use crate::utils::retry::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Outbound request behaviour of scrapers
    #[serde(default)]
    pub api: ApiConfig,

    /// Dispatch backoff used by the scheduler
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub collection: CollectionOptions,

    /// Batch window; required
    pub processing: ProcessingOptions,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scraper request settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Navigation timeout in seconds
    pub timeout_secs: u64,

    /// Attempts per URL, including the first
    pub retry_attempts: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retry_attempts: 3,
        }
    }
}

/// Scheduler timer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between ticks
    pub tick_interval_secs: u64,

    /// How far back a tick looks for missed cron occurrences
    pub max_catch_up_secs: u64,

    pub tick_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            max_catch_up_secs: 86_400,
            tick_on_startup: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/punchup.db"),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 8080,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("pretty"),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_required<T: FromStr>(key: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = std::env::var(key).with_context(|| format!("{key} must be set"))?;
    raw.parse::<T>()
        .with_context(|| format!("{key} has an invalid value: {raw}"))
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// `PUNCHUP_PROCESSING_MIN_BATCH_SIZE`, `PUNCHUP_PROCESSING_MAX_BATCH_SIZE`
    /// and `PUNCHUP_PROCESSING_DELAY_SECONDS` are required.
    pub fn from_env() -> Result<Self> {
        let processing = ProcessingOptions::new(
            env_required("PUNCHUP_PROCESSING_MIN_BATCH_SIZE")?,
            env_required("PUNCHUP_PROCESSING_MAX_BATCH_SIZE")?,
            env_required("PUNCHUP_PROCESSING_DELAY_SECONDS")?,
        );

        let api_defaults = ApiConfig::default();
        let scheduler_defaults = SchedulerConfig::default();
        let collection_defaults = CollectionOptions::default();
        let server_defaults = ServerConfig::default();

        let database_path = std::env::var("PUNCHUP_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| DatabaseConfig::default().path);

        Ok(Self {
            api: ApiConfig {
                timeout_secs: env_or("PUNCHUP_API_TIMEOUT_SECS", api_defaults.timeout_secs),
                retry_attempts: env_or("PUNCHUP_API_RETRY_ATTEMPTS", api_defaults.retry_attempts),
            },
            retry: RetryPolicy::new(env_or("PUNCHUP_DISPATCH_RETRY_ATTEMPTS", 3)),
            scheduler: SchedulerConfig {
                tick_interval_secs: env_or(
                    "PUNCHUP_TICK_INTERVAL_SECS",
                    scheduler_defaults.tick_interval_secs,
                ),
                max_catch_up_secs: env_or(
                    "PUNCHUP_MAX_CATCH_UP_SECS",
                    scheduler_defaults.max_catch_up_secs,
                ),
                tick_on_startup: env_or(
                    "PUNCHUP_TICK_ON_STARTUP",
                    scheduler_defaults.tick_on_startup,
                ),
            },
            collection: CollectionOptions {
                concurrency: env_or("PUNCHUP_CONCURRENCY", collection_defaults.concurrency),
                queue_capacity: env_or(
                    "PUNCHUP_QUEUE_CAPACITY",
                    collection_defaults.queue_capacity,
                ),
                requests_per_second: env_or(
                    "PUNCHUP_REQUESTS_PER_SECOND",
                    collection_defaults.requests_per_second,
                ),
                user_agent: std::env::var("PUNCHUP_USER_AGENT")
                    .unwrap_or(collection_defaults.user_agent),
                ..collection_defaults
            },
            processing,
            database: DatabaseConfig {
                path: database_path,
            },
            server: ServerConfig {
                host: std::env::var("PUNCHUP_HOST").unwrap_or(server_defaults.host),
                port: env_or("PUNCHUP_PORT", server_defaults.port),
            },
            logging: LoggingConfig {
                level: std::env::var("PUNCHUP_LOG_LEVEL").unwrap_or_else(|_| String::from("info")),
                format: std::env::var("PUNCHUP_LOG_FORMAT")
                    .unwrap_or_else(|_| String::from("pretty")),
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.api.timeout_secs == 0 {
            anyhow::bail!("api.timeout_secs must be greater than 0");
        }

        if self.api.retry_attempts == 0 {
            anyhow::bail!("api.retry_attempts must be at least 1");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            anyhow::bail!("retry.jitter must be within [0, 1]");
        }

        self.trigger_config()
            .validate()
            .context("invalid scheduler section")?;

        if self.collection.concurrency == 0 {
            anyhow::bail!("collection.concurrency must be greater than 0");
        }

        if self.collection.queue_capacity == 0 {
            anyhow::bail!("collection.queue_capacity must be greater than 0");
        }

        if self.collection.requests_per_second == 0 {
            anyhow::bail!("collection.requests_per_second must be greater than 0");
        }

        self.processing
            .validate()
            .context("invalid processing section")?;

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            anyhow::bail!("logging.format must be 'pretty' or 'json'");
        }

        Ok(())
    }

    /// Get navigation timeout as Duration
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            tick_interval_secs: self.scheduler.tick_interval_secs,
            tick_on_startup: self.scheduler.tick_on_startup,
        }
    }

    pub fn scheduling_options(&self) -> SchedulingOptions {
        let max_catch_up = i64::try_from(self.scheduler.max_catch_up_secs).unwrap_or(i64::MAX);
        SchedulingOptions {
            dispatch_retry: self.retry.clone(),
            max_catch_up: chrono::Duration::try_seconds(max_catch_up)
                .unwrap_or_else(|| chrono::Duration::days(1)),
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            collection: self.collection.clone(),
            navigation_timeout: self.navigation_timeout(),
            url_retry: RetryPolicy::new(self.api.retry_attempts),
        }
    }

    /// Socket address string for the HTTP server
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
