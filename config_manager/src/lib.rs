use chrono::{NaiveDate, TimeZone, Utc};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] ConfigError),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

/// Shortest Redis lock TTL that still leaves room for renewals
pub const MIN_LOCK_TTL_SECONDS: u64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// General system settings
    pub system: SystemSettings,

    /// Redis configuration (blob cache, distributed lock, notification details)
    pub redis: RedisConfig,

    /// Blob cache layout
    pub storage: StorageConfig,

    /// Zapper GraphQL configuration (transaction history)
    pub zapper: ZapperConfig,

    /// OpenAI Assistants configuration (batch and consolidation analysis)
    pub openai: OpenAiConfig,

    /// Analysis pipeline tuning
    pub pipeline: PipelineConfig,

    /// Frame notification settings
    pub notifications: NotificationConfig,

    /// API server configuration
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Enable debug mode
    pub debug_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// TTL of the per-address analysis lock when it is held in Redis; the
    /// running worker renews it every third of this period
    pub analysis_lock_ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where cached blobs live
    pub backend: StorageBackend,

    /// Prefix for normalized raw transaction lists
    pub raw_transactions_prefix: String,

    /// Prefix for per-chunk analyses and the chunk manifest
    pub analysis_chunks_prefix: String,

    /// Prefix for the consolidated analysis
    pub final_analysis_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZapperConfig {
    /// Zapper API key (sent as base64 Basic auth)
    pub api_key: String,

    /// GraphQL endpoint
    pub graphql_url: String,

    /// Network passed to accountsTimeline
    pub network: String,

    /// Page size (`first`) for each timeline request
    pub page_size: u32,

    /// Inclusive start of the analysis window (YYYY-MM-DD)
    pub window_start: String,

    /// Exclusive end of the analysis window (YYYY-MM-DD); extended to "now" once passed
    pub window_end: String,

    /// Hard stop on pages fetched per address
    pub max_pages: u32,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Ceiling for the whole fetch step in seconds
    pub fetch_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// OpenAI API key
    pub api_key: String,

    /// OpenAI API base URL
    pub api_base_url: String,

    /// Assistant that produces the wrapped categories
    pub assistant_id: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Interval between run status checks
    pub poll_interval_ms: u64,

    /// Maximum time to wait for a single run
    pub max_poll_wait_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Transactions per analysis batch
    pub chunk_size: usize,

    /// Attempts per provider unit (batch or consolidation), including the first
    pub max_attempts: u32,

    /// First backoff delay in milliseconds
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,

    /// Number of pipeline workers consuming the job queue
    pub worker_count: usize,

    /// Optional cap on concurrent batch analyses within one run (None = one per chunk)
    pub max_concurrent_batches: Option<usize>,

    /// Hold the per-address lock in Redis instead of process memory
    pub distributed_lock: bool,

    /// How long a failed job stays visible to status polling
    pub failed_job_retention_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Send "analysis ready" notifications when a subscriber id is supplied
    pub enabled: bool,

    /// URL opened when the notification is tapped
    pub target_url: String,

    pub title: String,

    pub body: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API server host
    pub host: String,

    /// API server port
    pub port: u16,

    /// Shared secret expected in the `x-api-key` header
    pub route_secret: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            system: SystemSettings { debug_mode: false },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                analysis_lock_ttl_seconds: 120,
            },
            storage: StorageConfig {
                backend: StorageBackend::Redis,
                raw_transactions_prefix: "wrapped-2024-raw".to_string(),
                analysis_chunks_prefix: "wrapped-2024-analysis-chunks".to_string(),
                final_analysis_prefix: "wrapped-2024-analysis".to_string(),
            },
            zapper: ZapperConfig {
                api_key: "".to_string(), // Must be set in .env or config file
                graphql_url: "https://public.zapper.xyz/graphql".to_string(),
                network: "BASE_MAINNET".to_string(),
                page_size: 75,
                window_start: "2024-01-01".to_string(),
                window_end: "2025-01-01".to_string(),
                max_pages: 400,
                request_timeout_seconds: 30,
                fetch_timeout_seconds: 300,
            },
            openai: OpenAiConfig {
                api_key: "".to_string(), // Must be set in .env or config file
                api_base_url: "https://api.openai.com/v1".to_string(),
                assistant_id: "".to_string(),
                request_timeout_seconds: 60,
                poll_interval_ms: 1000,
                max_poll_wait_seconds: 300,
            },
            pipeline: PipelineConfig {
                chunk_size: 200,
                max_attempts: 5,
                base_delay_ms: 1000,
                max_delay_ms: 30000,
                worker_count: 4,
                max_concurrent_batches: None,
                distributed_lock: false,
                failed_job_retention_seconds: 3600,
            },
            notifications: NotificationConfig {
                enabled: true,
                target_url: "http://localhost:3000".to_string(),
                title: "Analysis Complete! 🎉".to_string(),
                body: "Your Base Wrapped analysis is ready to view".to_string(),
                request_timeout_seconds: 10,
            },
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                route_secret: "".to_string(),
            },
        }
    }
}

impl ZapperConfig {
    /// Validate Zapper configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "Zapper API key is required".to_string(),
            ));
        }

        if self.page_size == 0 || self.max_pages == 0 {
            return Err(ConfigurationError::InvalidValue(
                "Zapper page_size and max_pages must be greater than 0".to_string(),
            ));
        }

        let (start, end) = self.window_bounds_ms()?;
        if start >= end {
            return Err(ConfigurationError::InvalidValue(format!(
                "Zapper window_start '{}' must be before window_end '{}'",
                self.window_start, self.window_end
            )));
        }

        Ok(())
    }

    /// Analysis window as epoch milliseconds `[start, end)`.
    ///
    /// The end is pushed out to the current time once the configured end date
    /// has passed, so late requests still see activity after it.
    pub fn window_bounds_ms(&self) -> Result<(i64, i64)> {
        let start = parse_date_ms(&self.window_start)?;
        let end = parse_date_ms(&self.window_end)?;
        let now = Utc::now().timestamp_millis();
        Ok((start, end.max(now)))
    }
}

impl OpenAiConfig {
    /// Validate OpenAI configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "OpenAI API key is required".to_string(),
            ));
        }

        if self.assistant_id.is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "OpenAI assistant id is required".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 || self.max_poll_wait_seconds == 0 {
            return Err(ConfigurationError::InvalidValue(
                "OpenAI poll interval and max wait must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl PipelineConfig {
    /// Validate pipeline tuning
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ConfigurationError::InvalidValue(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigurationError::InvalidValue(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.worker_count == 0 {
            return Err(ConfigurationError::InvalidValue(
                "worker_count must be at least 1".to_string(),
            ));
        }

        if self.max_concurrent_batches == Some(0) {
            return Err(ConfigurationError::InvalidValue(
                "max_concurrent_batches cannot be 0 (omit it for no cap)".to_string(),
            ));
        }

        Ok(())
    }
}

impl ApiConfig {
    /// Checked by the HTTP server only; the CLI runs without a route secret
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(ConfigurationError::InvalidValue(
                "API port cannot be 0".to_string(),
            ));
        }

        if self.route_secret.is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "API route secret is required".to_string(),
            ));
        }

        Ok(())
    }
}

impl SystemConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config_builder = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&SystemConfig::default())?);

        if config_path.as_ref().exists() {
            info!(
                "Loading configuration from: {}",
                config_path.as_ref().display()
            );
            config_builder = config_builder.add_source(File::from(config_path.as_ref()));
        } else {
            debug!("Config file not found, using defaults and environment variables");
        }

        // e.g. WRAPPED__OPENAI__API_KEY
        config_builder = config_builder.add_source(
            Environment::with_prefix("WRAPPED")
                .try_parsing(true)
                .separator("__"),
        );

        let system_config: SystemConfig = config_builder.build()?.try_deserialize()?;

        system_config.validate()?;

        Ok(system_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.zapper.validate()?;
        self.openai.validate()?;
        self.pipeline.validate()?;

        if self.pipeline.distributed_lock && self.redis.analysis_lock_ttl_seconds < MIN_LOCK_TTL_SECONDS {
            return Err(ConfigurationError::InvalidValue(format!(
                "analysis_lock_ttl_seconds must be at least {} with distributed_lock",
                MIN_LOCK_TTL_SECONDS
            )));
        }

        Ok(())
    }

    /// Configuration as JSON with secrets blanked, for API responses and logs
    pub fn redacted(&self) -> serde_json::Value {
        let mut redacted = self.clone();
        for secret in [
            &mut redacted.zapper.api_key,
            &mut redacted.openai.api_key,
            &mut redacted.api.route_secret,
        ] {
            if !secret.is_empty() {
                *secret = "***".to_string();
            }
        }
        serde_json::to_value(redacted).unwrap_or(serde_json::Value::Null)
    }
}

fn parse_date_ms(value: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| {
        ConfigurationError::InvalidValue(format!("Invalid date '{}': {}", value, e))
    })?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ConfigurationError::InvalidValue(format!("Invalid date '{}'", value)))?;
    Ok(Utc.from_utc_datetime(&midnight).timestamp_millis())
}
