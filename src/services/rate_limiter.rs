//! Rate limiting and retry logic for debrid API calls
//!
//! Provides rate-limited HTTP clients, the bounded retry policy shared by all
//! adapters, and the polling helper used by the protocol state machine.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::Client;
use tracing::{debug, warn};

use crate::services::debrid::{DebridError, DebridResult};

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst capacity (allows short bursts above the rate)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2,
            burst_size: 5,
        }
    }
}

/// A rate-limited HTTP client wrapper
pub struct RateLimitedClient {
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    name: String,
}

impl RateLimitedClient {
    /// Create a new rate-limited client
    pub fn new(name: &str, config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        let limiter = Arc::new(RateLimiter::direct(quota));

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("debrid-resolver/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(client = %name, error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        Self {
            client,
            limiter,
            name: name.to_string(),
        }
    }

    /// Create a client for Real-Debrid
    pub fn for_real_debrid() -> Self {
        // Real-Debrid allows 250 requests per minute
        Self::new(
            "realdebrid",
            RateLimitConfig {
                requests_per_second: 4,
                burst_size: 8,
            },
        )
    }

    /// Create a client for AllDebrid
    pub fn for_alldebrid() -> Self {
        // AllDebrid allows 12 requests per second, 600 per minute
        Self::new(
            "alldebrid",
            RateLimitConfig {
                requests_per_second: 8,
                burst_size: 10,
            },
        )
    }

    /// Create a client for TorBox
    pub fn for_torbox() -> Self {
        // TorBox has no published general limit; creation endpoints are strict
        Self::new(
            "torbox",
            RateLimitConfig {
                requests_per_second: 3,
                burst_size: 5,
            },
        )
    }

    /// Get a reference to the underlying client for custom requests
    /// (caller is responsible for calling wait_for_permit first)
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Wait for a rate limit permit
    pub async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
        debug!(client = %self.name, "Acquired rate limit permit");
    }
}

/// Bounded retry policy, also used (with a multiplier of 1.0) for polling
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Maximum backoff duration
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Fixed-interval policy for status polling
    pub fn polling(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: interval,
            max_delay: interval,
            backoff_factor: 1.0,
        }
    }

    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.base_delay,
            max_interval: self.max_delay,
            multiplier: self.backoff_factor,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

/// Execute an async operation, retrying only retryable failures
pub async fn retry_async<T, Fut, F>(
    operation: F,
    config: &RetryPolicy,
    operation_name: &str,
) -> DebridResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = DebridResult<T>>,
{
    retry_async_if(operation, config, operation_name, DebridError::is_retryable).await
}

/// Like [`retry_async`], re-attempting only failures `should_retry` accepts
pub async fn retry_async_if<T, Fut, F>(
    operation: F,
    config: &RetryPolicy,
    operation_name: &str,
    should_retry: fn(&DebridError) -> bool,
) -> DebridResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = DebridResult<T>>,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                if attempts >= config.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempts = attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                if let Some(duration) = backoff.next_backoff() {
                    let retry_ms: u128 = duration.as_millis();
                    warn!(
                        operation = %operation_name,
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = retry_ms,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}

/// Poll until `done` accepts a value, at most `config.max_attempts` times.
///
/// Exceeding the bound yields [`DebridError::Timeout`]; errors from the poll
/// itself are returned unchanged.
pub async fn poll_until<T, Fut, F, P>(
    mut poll: F,
    done: P,
    config: &RetryPolicy,
    operation_name: &str,
) -> DebridResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DebridResult<T>>,
    P: Fn(&T) -> bool,
{
    let mut backoff = config.to_backoff();

    for attempt in 1..=config.max_attempts {
        let value = poll().await?;
        if done(&value) {
            debug!(operation = %operation_name, attempt = attempt, "Poll settled");
            return Ok(value);
        }
        if attempt < config.max_attempts {
            let delay = backoff.next_backoff().unwrap_or(config.max_delay);
            tokio::time::sleep(delay).await;
        }
    }

    warn!(
        operation = %operation_name,
        attempts = config.max_attempts,
        "Poll bound exceeded"
    );
    Err(DebridError::Timeout(format!(
        "{} did not settle after {} polls",
        operation_name, config.max_attempts
    )))
}
