//! Error taxonomy for debrid resolution
//!
//! Every remote call and every state-machine transition returns
//! `Result<T, DebridError>`. The error is `Clone` so a single scan result can
//! be handed to every caller waiting on the same info-hash.

use thiserror::Error;

use super::types::DebridServiceKind;

/// Maximum number of bytes of a raw provider payload kept for diagnostics
pub const PAYLOAD_SNIPPET_LEN: usize = 512;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DebridError {
    /// Credentials rejected (401/403). Fatal for this call, never retried.
    #[error("{service} rejected the API key")]
    Auth { service: DebridServiceKind },

    /// Resource or file absent on the provider side
    #[error("{service}: not found: {what}")]
    NotFound {
        service: DebridServiceKind,
        what: String,
    },

    /// Provider throttled us and the retry budget ran out
    #[error("{service} rate limit exceeded")]
    RateLimited { service: DebridServiceKind },

    /// Network timeout, or a polling loop exceeded its bound
    #[error("timed out: {0}")]
    Timeout(String),

    /// Unexpected response shape
    #[error("{service} returned an unexpected response: {message}")]
    Protocol {
        service: DebridServiceKind,
        message: String,
    },

    /// Provider refuses new submissions until an active resource is removed
    #[error("{service} active resource quota exceeded")]
    QuotaExceeded { service: DebridServiceKind },

    /// 5xx or connection-level failure
    #[error("{service} transient failure: {message}")]
    Transient {
        service: DebridServiceKind,
        message: String,
    },

    /// Persistent store failure
    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DebridError {
    pub fn protocol(service: DebridServiceKind, message: impl Into<String>) -> Self {
        Self::Protocol {
            service,
            message: message.into(),
        }
    }

    pub fn not_found(service: DebridServiceKind, what: impl Into<String>) -> Self {
        Self::NotFound {
            service,
            what: what.into(),
        }
    }

    /// Whether the shared retry policy may re-attempt the call
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Transient { .. } | Self::Timeout(_)
        )
    }

    /// Whether a non-idempotent request may have reached the provider
    /// despite failing on our side (timeouts, 5xx, dropped connections)
    pub fn may_have_landed(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout(_))
    }

    /// Retry rule for submissions: only explicit throttling is resent
    pub fn is_safe_to_resend(&self) -> bool {
        self.is_retryable() && !self.may_have_landed()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for DebridError {
    fn from(err: sqlx::Error) -> Self {
        DebridError::Store(err.to_string())
    }
}

/// Cut a raw payload down to something safe to log
pub fn truncate_payload(body: &str) -> String {
    if body.len() <= PAYLOAD_SNIPPET_LEN {
        return body.to_string();
    }
    let mut end = PAYLOAD_SNIPPET_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

pub type DebridResult<T> = Result<T, DebridError>;
