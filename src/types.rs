//! Core error taxonomy shared across the crate.
//!
//! `HoldfastError` is a `thiserror` enum with an HTTP `status_code()`
//! mapping, a stable `classification()` label for response bodies, and an
//! `is_transient()` classifier implementing the spec §7 taxonomy (only
//! transient collaborator errors are worth redelivering). `anyhow` is used
//! at the binary boundary; this type is the service-internal error.

use hyper::StatusCode;

/// Service-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum HoldfastError {
    /// Bad input surfaced synchronously to the caller; never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication/authorization failure.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Requested entity not found (also used for owner-scoped hiding).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation rejected because the entity is in an incompatible state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Submission rate limit exceeded.
    #[error("Rate limited")]
    RateLimited,

    /// Temporary unreachability of a collaborator (storage network or
    /// ledger). The processing job may be redelivered with backoff.
    #[error("Transient collaborator error: {0}")]
    Transient(String),

    /// Permanent failure (malformed external identifiers, rejected
    /// negotiation terms). Not retried.
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Durable job queue failure.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Persistence layer failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Misconfiguration or client-construction failure.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HoldfastError {
    /// HTTP status for the request-facing surface (spec §6).
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Permanent(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable, detail-free classification string for the response body.
    pub fn classification(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::RateLimited => "rate_limited",
            Self::Transient(_) => "transient_error",
            Self::Permanent(_) => "permanent_error",
            Self::Queue(_) => "queue_error",
            Self::Database(_) => "database_error",
            Self::Config(_) => "config_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the error is a transient collaborator outage worth
    /// redelivering the job for (spec §7).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<jsonwebtoken::errors::Error> for HoldfastError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {err}"))
    }
}

impl From<reqwest::Error> for HoldfastError {
    fn from(err: reqwest::Error) -> Self {
        // Transport-level failures talking to IPFS/Lotus are temporary
        // unreachability of a collaborator (spec §7).
        Self::Transient(format!("HTTP request failed: {err}"))
    }
}

/// Result alias carrying [`HoldfastError`].
pub type Result<T> = std::result::Result<T, HoldfastError>;
