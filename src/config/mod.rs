//! Configuration management for the presswork pipeline
//!
//! Handles loading and validating configuration from environment variables
//! and TOML files. Environment variables use the `PRESSWORK_` prefix and
//! override nothing once a config file is loaded; pick one source.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Content fetcher configuration
    pub fetcher: FetcherConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Response cache configuration
    pub cache: CacheConfig,

    /// Generation orchestrator configuration
    pub generation: GenerationConfig,

    /// Discovery and queue maintenance thresholds
    pub pipeline: PipelineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Fetcher-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Rate limit (requests per second)
    pub rate_limit: u32,

    /// Maximum retry attempts per fetch
    pub max_retries: u32,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Maximum redirect hops to follow
    pub max_redirects: usize,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub path: PathBuf,
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Default fetch cache TTL in seconds
    pub fetch_ttl_secs: u64,

    /// Key prefix for namespacing
    pub key_prefix: String,
}

/// Generation orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum concurrent outbound generation calls (shared limiter)
    pub max_concurrent: usize,

    /// Attempts to acquire a limiter slot before giving up
    pub acquire_attempts: u32,

    /// OpenAI-compatible API base URL
    pub openai_base_url: String,

    /// Ollama endpoint URL
    pub ollama_endpoint: String,
}

/// Discovery and queue maintenance thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minutes after which a claimed item is considered stuck
    pub reclaim_after_mins: i64,

    /// Minutes after which an in-progress discovery flag is considered stale
    pub discovery_stuck_after_mins: i64,

    /// Days after which completed/failed items are purged
    pub purge_after_days: i64,

    /// Directory published article files are written to
    pub output_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let rate_limit = env_parse("PRESSWORK_RATE_LIMIT", 2u32);
        let max_retries = env_parse("PRESSWORK_MAX_RETRIES", 3u32);
        let request_timeout_secs = env_parse("PRESSWORK_REQUEST_TIMEOUT", 30u64);
        let max_redirects = env_parse("PRESSWORK_MAX_REDIRECTS", 5usize);

        let database_path = std::env::var("PRESSWORK_DB_PATH")
            .unwrap_or_else(|_| String::from("data/presswork.db"))
            .into();

        let cache_url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| String::from("redis://localhost:6379"));

        let openai_base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| String::from("https://api.openai.com"));

        let ollama_endpoint = std::env::var("OLLAMA_ENDPOINT")
            .unwrap_or_else(|_| String::from("http://localhost:11434"));

        Ok(Self {
            fetcher: FetcherConfig {
                rate_limit,
                max_retries,
                request_timeout_secs,
                max_redirects,
            },
            database: DatabaseConfig {
                path: database_path,
            },
            cache: CacheConfig {
                url: cache_url,
                pool_size: env_parse("REDIS_POOL_SIZE", 10usize),
                fetch_ttl_secs: env_parse("PRESSWORK_CACHE_TTL", 3600u64),
                key_prefix: std::env::var("PRESSWORK_CACHE_PREFIX")
                    .unwrap_or_else(|_| String::from("presswork")),
            },
            generation: GenerationConfig {
                max_concurrent: env_parse("PRESSWORK_MAX_CONCURRENT_GENERATIONS", 4usize),
                acquire_attempts: env_parse("PRESSWORK_ACQUIRE_ATTEMPTS", 5u32),
                openai_base_url,
                ollama_endpoint,
            },
            pipeline: PipelineConfig {
                reclaim_after_mins: env_parse("PRESSWORK_RECLAIM_AFTER_MINS", 30i64),
                discovery_stuck_after_mins: env_parse("PRESSWORK_DISCOVERY_STUCK_MINS", 30i64),
                purge_after_days: env_parse("PRESSWORK_PURGE_AFTER_DAYS", 30i64),
                output_dir: std::env::var("PRESSWORK_OUTPUT_DIR")
                    .unwrap_or_else(|_| String::from("output"))
                    .into(),
            },
            logging: LoggingConfig {
                level: std::env::var("PRESSWORK_LOG_LEVEL")
                    .unwrap_or_else(|_| String::from("info")),
                format: std::env::var("PRESSWORK_LOG_FORMAT")
                    .unwrap_or_else(|_| String::from("text")),
            },
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.rate_limit == 0 {
            anyhow::bail!("fetcher.rate_limit must be greater than 0");
        }

        if self.fetcher.max_redirects == 0 {
            anyhow::bail!("fetcher.max_redirects must be greater than 0");
        }

        if self.generation.max_concurrent == 0 {
            anyhow::bail!("generation.max_concurrent must be greater than 0");
        }

        if self.pipeline.reclaim_after_mins <= 0 {
            anyhow::bail!("pipeline.reclaim_after_mins must be positive");
        }

        Ok(())
    }

    /// Request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetcher.request_timeout_secs)
    }

    /// Fetch cache TTL as a Duration
    pub fn fetch_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.fetch_ttl_secs)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
