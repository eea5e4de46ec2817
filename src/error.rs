//! Error types for SendGuard.

/// Top-level error type for the dashboard backend.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}

/// The three user-facing failure kinds, plus session failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The store has not been configured yet. Not a failure.
    NotConfigured,
    /// Network or store error. The caller may retry.
    FetchFailed,
    /// Local input validation failed before any store call.
    Validation,
    /// No valid session.
    Unauthorized,
    /// The record identifier no longer exists.
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::FetchFailed => "fetch_failed",
            Self::Validation => "validation",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
        }
    }
}

impl Error {
    /// Classify this error into the kind the presentation layer renders.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(ConfigError::NotConfigured) => ErrorKind::NotConfigured,
            Self::Config(_) => ErrorKind::Validation,
            Self::Store(StoreError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::FetchFailed,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Auth(AuthError::Unavailable(_)) => ErrorKind::FetchFailed,
            Self::Auth(_) => ErrorKind::Unauthorized,
            Self::Realtime(_) => ErrorKind::FetchFailed,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Store is not configured")]
    NotConfigured,

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hosted store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Request to {table} failed: {reason}")]
    Request { table: String, reason: String },

    #[error("Store returned {status} for {table}: {body}")]
    Status {
        table: String,
        status: u16,
        body: String,
    },

    #[error("Record {id} not found in {table}")]
    NotFound { table: String, id: i64 },

    #[error("Invalid response from {table}: {reason}")]
    InvalidResponse { table: String, reason: String },
}

/// Local validation errors, raised before any store call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required for the {action} action")]
    Required { field: String, action: String },

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Action {action} is not available in the {queue} queue")]
    ActionNotPermitted { queue: String, action: String },

    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Malformed request body: {0}")]
    MalformedBody(String),
}

impl ValidationError {
    /// The form field this error should be shown against, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Required { field, .. } => Some(field),
            Self::InvalidTimeRange(_) => Some("time_range"),
            Self::MalformedBody(_) => Some("body"),
            _ => None,
        }
    }
}

/// Identity provider errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Session expired")]
    SessionExpired,

    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Change-feed errors.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("Failed to connect to change feed: {0}")]
    Connect(String),

    #[error("Change feed protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
