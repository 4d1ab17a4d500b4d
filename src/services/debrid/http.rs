//! Shared HTTP plumbing for provider clients
//!
//! Pacing, per-call timeouts, retries and the mapping from HTTP outcomes to
//! [`DebridError`] live here so each provider only describes its endpoints.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::error::{DebridError, DebridResult, truncate_payload};
use super::types::DebridServiceKind;
use crate::services::rate_limiter::{RateLimitedClient, RetryPolicy, retry_async_if};

/// Provider-specific error envelope inspection, applied to every response
/// body. Returns `Some` when the body describes a failure.
pub type BodyErrorFn = fn(&str) -> Option<DebridError>;

/// How heavy a call is, which decides its timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallWeight {
    /// Status polls, listings, deletes
    Light,
    /// Adding a magnet
    Submit,
    /// Unrestricting a link
    Unlock,
}

impl CallWeight {
    pub fn timeout(self) -> Duration {
        match self {
            CallWeight::Light => Duration::from_secs(10),
            CallWeight::Submit => Duration::from_secs(30),
            CallWeight::Unlock => Duration::from_secs(15),
        }
    }

    /// Which failures may be re-attempted for this kind of call
    pub fn retry_rule(self) -> fn(&DebridError) -> bool {
        match self {
            CallWeight::Submit => DebridError::is_safe_to_resend,
            CallWeight::Light | CallWeight::Unlock => DebridError::is_retryable,
        }
    }
}

pub struct DebridHttp {
    client: Arc<RateLimitedClient>,
    service: DebridServiceKind,
    retry: RetryPolicy,
    body_error: BodyErrorFn,
}

impl DebridHttp {
    pub fn new(
        service: DebridServiceKind,
        client: RateLimitedClient,
        retry: RetryPolicy,
        body_error: BodyErrorFn,
    ) -> Self {
        Self {
            client: Arc::new(client),
            service,
            retry,
            body_error,
        }
    }

    pub fn service(&self) -> DebridServiceKind {
        self.service
    }

    /// Send a request built by `build`, retrying retryable failures, and
    /// return the raw body of a successful response.
    ///
    /// Submissions are only resent after explicit throttling; a timed out
    /// submission may already exist on the account.
    pub async fn send_text<B>(&self, operation: &str, weight: CallWeight, build: B) -> DebridResult<String>
    where
        B: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        retry_async_if(
            || self.attempt(operation, weight, &build),
            &self.retry,
            operation,
            weight.retry_rule(),
        )
        .await
    }

    /// Like [`send_text`](Self::send_text), decoding the body as JSON
    pub async fn send_json<T, B>(&self, operation: &str, weight: CallWeight, build: B) -> DebridResult<T>
    where
        T: DeserializeOwned,
        B: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let body = self.send_text(operation, weight, build).await?;
        decode(self.service, operation, &body)
    }

    async fn attempt<B>(&self, operation: &str, weight: CallWeight, build: &B) -> DebridResult<String>
    where
        B: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        self.client.wait_for_permit().await;

        let response = build(self.client.inner())
            .timeout(weight.timeout())
            .send()
            .await
            .map_err(|e| transport_error(self.service, operation, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(self.service, operation, &e))?;

        debug!(
            service = %self.service,
            operation = %operation,
            status = status.as_u16(),
            "Provider responded"
        );

        // Some providers report failures inside a 200 envelope
        if let Some(err) = (self.body_error)(&body) {
            debug!(service = %self.service, operation = %operation, error = %err, "Provider error envelope");
            return Err(err);
        }
        if status.is_success() {
            return Ok(body);
        }
        Err(classify_status(self.service, status, operation, &body))
    }
}

/// Map a non-success HTTP status onto the error taxonomy
pub fn classify_status(
    service: DebridServiceKind,
    status: StatusCode,
    operation: &str,
    body: &str,
) -> DebridError {
    match status.as_u16() {
        401 | 403 => DebridError::Auth { service },
        404 => DebridError::not_found(service, operation),
        429 => DebridError::RateLimited { service },
        408 | 500..=599 => DebridError::Transient {
            service,
            message: format!("{} returned HTTP {}", operation, status),
        },
        _ => {
            warn!(
                service = %service,
                operation = %operation,
                status = status.as_u16(),
                payload = %truncate_payload(body),
                "Unexpected provider status"
            );
            DebridError::protocol(service, format!("{} returned HTTP {}", operation, status))
        }
    }
}

/// Decode a provider payload; undecodable bodies become protocol errors
pub fn decode<T: DeserializeOwned>(
    service: DebridServiceKind,
    operation: &str,
    body: &str,
) -> DebridResult<T> {
    serde_json::from_str(body).map_err(|e| {
        warn!(
            service = %service,
            operation = %operation,
            error = %e,
            payload = %truncate_payload(body),
            "Undecodable provider response"
        );
        DebridError::protocol(service, format!("{}: {}", operation, e))
    })
}

fn transport_error(service: DebridServiceKind, operation: &str, err: &reqwest::Error) -> DebridError {
    if err.is_timeout() {
        DebridError::Timeout(format!("{} {}", service, operation))
    } else {
        DebridError::Transient {
            service,
            message: format!("{}: {}", operation, err),
        }
    }
}
