//! Error types and failure classification.

use thiserror::Error;

/// Errors surfaced by DispatchPulse components.
#[derive(Debug, Error)]
pub enum PulseError {
    /// Malformed window, missing credentials, unreadable config file.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("state store error: {0}")]
    State(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PulseError>;

/// Failure talking to the upstream metrics provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("upstream timed out after {0}s")]
    Timeout(u64),

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("upstream data rejected: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Whether a later attempt may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Timeout(_) | SourceError::Unreachable(_) => true,
            SourceError::Status(code) => *code >= 500 || *code == 429 || *code == 408,
            SourceError::Malformed(_) => false,
        }
    }
}

/// Outcome of a failed sync, carried in `SyncResult`.
///
/// The variant says what the report falls back to; the wrapped
/// `SourceError` keeps the upstream classification.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncFailure {
    /// Upstream failed but a previous cache is being reused.
    Transient(SourceError),
    /// Upstream failed and nothing is cached for the requested date.
    Unavailable(SourceError),
}

impl SyncFailure {
    pub fn error(&self) -> &SourceError {
        match self {
            SyncFailure::Transient(e) | SyncFailure::Unavailable(e) => e,
        }
    }

    /// "transient" or "permanent", from the upstream error.
    pub fn kind(&self) -> &'static str {
        if self.error().is_transient() {
            "transient"
        } else {
            "permanent"
        }
    }
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncFailure::Transient(e) => write!(f, "stale fallback after {} failure: {e}", self.kind()),
            SyncFailure::Unavailable(e) => write!(f, "unavailable after {} failure: {e}", self.kind()),
        }
    }
}

/// Retryable vs non-retryable delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Timeout, 5xx, 429, connectivity.
    Transient,
    /// Bad credentials, unknown destination, malformed payload.
    Permanent,
}

impl DeliveryErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryErrorKind::Transient => "transient",
            DeliveryErrorKind::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} delivery failure: {message}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
}

impl DeliveryError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: DeliveryErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == DeliveryErrorKind::Transient
    }
}

/// Result of a single `DeliveryChannel::send` call.
pub type DeliveryResult = std::result::Result<(), DeliveryError>;
