//! Error types for the calltrace domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Errors are split into two
//! tiers:
//! - the **caller tier** ([`Error`], [`CallerError`], [`ProviderError`]) reaches
//!   whoever invoked the wrapped client;
//! - the **telemetry tier** ([`TelemetryError`]) never leaves the emission
//!   boundary. It is logged and swallowed there.

use thiserror::Error;

/// The top-level, caller-facing error type for intercepted calls.
#[derive(Debug, Error)]
pub enum Error {
    // --- Caller errors ---
    #[error("Caller error: {0}")]
    Caller(#[from] CallerError),

    // --- Errors raised by the wrapped target ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Misuse of the proxy by its caller. Always raised before the wrapped
/// target is invoked.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallerError {
    #[error("Tags must be a list of strings, got {0}")]
    InvalidTags(String),

    #[error("`{key}` must be a boolean, got {found}")]
    InvalidFlag { key: String, found: String },

    #[error("`{0}` is not callable")]
    NotCallable(String),

    #[error("`{0}` has no members")]
    NoMembers(String),
}

/// Errors raised by the wrapped target itself. The proxy forwards these to
/// the caller untouched.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("No member `{name}` on `{target}`")]
    MissingMember { target: String, name: String },

    #[error("Member `{0}` is read-only")]
    ReadOnly(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures on the telemetry path. These never propagate past
/// the emission boundary.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Missing analytics credential: {0}")]
    MissingCredential(String),

    #[error("Telemetry transport failed: {0}")]
    Transport(String),

    #[error("Telemetry endpoint rejected the request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Log store error: {0}")]
    LogStore(String),

    #[error("Unexpected chunk shape: {0}")]
    UnexpectedChunkShape(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TelemetryError {
    /// Whether this failure is a configuration problem rather than a
    /// transport or data problem.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingCredential(_))
    }
}
