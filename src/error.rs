//! Error types for Meridian

use thiserror::Error;

/// Main error type for Meridian
#[derive(Debug, Error)]
pub enum Error {
    /// Registry/configuration errors; fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(String),

    /// Object-storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Work-queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// Unknown stream name
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Unknown signal name
    #[error("Signal not found: {0}")]
    SignalNotFound(String),

    /// Source exists but is deactivated
    #[error("Source inactive: {0}")]
    SourceInactive(String),

    /// No stored credentials for an oauth2 source
    #[error("Authentication missing: {0}")]
    AuthMissing(String),

    /// Token refresh was attempted and rejected upstream
    #[error("Token refresh failed: {0}")]
    AuthRefreshFailed(String),

    /// Transient upstream failure; retryable with backoff
    #[error("Upstream error: {0}")]
    UpstreamTransient(String),

    /// Upstream rejected our resume cursor as gone/expired
    #[error("Cursor invalidated: {0}")]
    CursorInvalidated(String),

    /// Upstream returned a payload we cannot interpret; not retryable
    #[error("Upstream schema error: {0}")]
    UpstreamSchema(String),

    /// Local payload/schema validation failure; not retryable
    #[error("Validation error: {0}")]
    Validation(String),

    /// Task exceeded its deadline or was cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A detector failed internally; other signals continue
    #[error("Detector error: {0}")]
    Detector(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQL errors
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Reqwest HTTP client errors
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry with backoff can plausibly succeed.
    ///
    /// Auth and schema failures need human or code intervention; retrying
    /// them only burns the upstream quota.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::UpstreamTransient(_)
                | Error::Cancelled(_)
                | Error::Redis(_)
                | Error::Reqwest(_)
                | Error::Sql(_)
                | Error::Database(_)
                | Error::Storage(_)
                | Error::Queue(_)
        )
    }

    /// Short stable class tag recorded in audit rows.
    pub fn class(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "config_invalid",
            Error::Database(_) | Error::Sql(_) => "database",
            Error::Storage(_) => "storage",
            Error::Queue(_) | Error::Redis(_) => "queue",
            Error::StreamNotFound(_) => "stream_not_found",
            Error::SignalNotFound(_) => "signal_not_found",
            Error::SourceInactive(_) => "source_inactive",
            Error::AuthMissing(_) => "auth_missing",
            Error::AuthRefreshFailed(_) => "auth_refresh_failed",
            Error::UpstreamTransient(_) | Error::Reqwest(_) => "upstream_transient",
            Error::CursorInvalidated(_) => "cursor_invalidated",
            Error::UpstreamSchema(_) => "upstream_schema",
            Error::Validation(_) => "validation",
            Error::Cancelled(_) => "cancelled",
            Error::Detector(_) => "detector_internal",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

/// Result type alias for Meridian operations
pub type Result<T> = std::result::Result<T, Error>;
