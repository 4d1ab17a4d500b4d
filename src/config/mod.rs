//! Application configuration management

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::debrid::{DebridCredentials, DebridServiceKind, DriverSettings};
use crate::services::queues::ScanQueueConfig;
use crate::services::rate_limiter::RetryPolicy;
use crate::services::resolution::ResolutionSettings;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL (`sqlite://` prefix added to bare paths)
    pub database_url: String,

    /// Provider used by the command-line harness
    pub debrid_service: Option<DebridServiceKind>,

    /// API key for `debrid_service`
    pub debrid_api_key: Option<String>,

    /// Heavy scans admitted at once
    pub scan_queue_concurrency: usize,

    /// Pause after each heavy scan
    pub scan_queue_delay_ms: u64,

    /// Streams and movie files below this are rejected
    pub min_stream_size_mb: u64,

    pub movie_pack_ttl_days: u32,

    pub conversion_poll_attempts: u32,

    pub fetch_poll_attempts: u32,

    pub poll_interval_ms: u64,

    /// Attempts per HTTP call, including the first
    pub http_max_retries: u32,

    pub http_retry_base_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |name: &str, default: &str| -> Result<String> {
            Ok(lookup(name).unwrap_or_else(|| default.to_string()))
        };

        // Prefer DATABASE_PATH, fall back to DATABASE_URL
        let database = lookup("DATABASE_PATH")
            .or_else(|| lookup("DATABASE_URL"))
            .unwrap_or_else(|| "./data/debrid.db".to_string());
        let database_url = if database.starts_with("sqlite:") {
            database
        } else {
            format!("sqlite://{}", database)
        };

        let debrid_service = lookup("DEBRID_SERVICE")
            .map(|s| DebridServiceKind::from_str(&s))
            .transpose()
            .context("Invalid DEBRID_SERVICE")?;

        Ok(Self {
            database_url,

            debrid_service,

            debrid_api_key: lookup("DEBRID_API_KEY").filter(|k| !k.trim().is_empty()),

            scan_queue_concurrency: parse("SCAN_QUEUE_CONCURRENCY", "1")?
                .parse()
                .context("Invalid SCAN_QUEUE_CONCURRENCY")?,

            scan_queue_delay_ms: parse("SCAN_QUEUE_DELAY_MS", "300")?
                .parse()
                .context("Invalid SCAN_QUEUE_DELAY_MS")?,

            min_stream_size_mb: parse("MIN_STREAM_SIZE_MB", "50")?
                .parse()
                .context("Invalid MIN_STREAM_SIZE_MB")?,

            movie_pack_ttl_days: parse("MOVIE_PACK_TTL_DAYS", "30")?
                .parse()
                .context("Invalid MOVIE_PACK_TTL_DAYS")?,

            conversion_poll_attempts: parse("CONVERSION_POLL_ATTEMPTS", "5")?
                .parse()
                .context("Invalid CONVERSION_POLL_ATTEMPTS")?,

            fetch_poll_attempts: parse("FETCH_POLL_ATTEMPTS", "30")?
                .parse()
                .context("Invalid FETCH_POLL_ATTEMPTS")?,

            poll_interval_ms: parse("POLL_INTERVAL_MS", "1000")?
                .parse()
                .context("Invalid POLL_INTERVAL_MS")?,

            http_max_retries: parse("HTTP_MAX_RETRIES", "3")?
                .parse()
                .context("Invalid HTTP_MAX_RETRIES")?,

            http_retry_base_ms: parse("HTTP_RETRY_BASE_MS", "500")?
                .parse()
                .context("Invalid HTTP_RETRY_BASE_MS")?,
        })
    }

    /// Credentials for the command-line harness
    pub fn credentials(&self) -> Result<DebridCredentials> {
        let service = self.debrid_service.context("DEBRID_SERVICE is required")?;
        let api_key = self
            .debrid_api_key
            .clone()
            .context("DEBRID_API_KEY is required")?;
        Ok(DebridCredentials::new(service, api_key))
    }

    /// Retry policy for individual HTTP calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.http_max_retries.max(1),
            base_delay: Duration::from_millis(self.http_retry_base_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn scan_queue_config(&self) -> ScanQueueConfig {
        ScanQueueConfig {
            max_concurrent: self.scan_queue_concurrency,
            task_delay: Duration::from_millis(self.scan_queue_delay_ms),
        }
    }

    pub fn resolution_settings(&self) -> ResolutionSettings {
        let interval = Duration::from_millis(self.poll_interval_ms);
        ResolutionSettings {
            driver: DriverSettings {
                conversion_poll: RetryPolicy::polling(self.conversion_poll_attempts.max(1), interval),
                fetch_poll: RetryPolicy::polling(self.fetch_poll_attempts.max(1), interval),
                min_stream_size_bytes: self.min_stream_size_mb * 1024 * 1024,
            },
            movie_pack_ttl_days: self.movie_pack_ttl_days,
        }
    }
}
