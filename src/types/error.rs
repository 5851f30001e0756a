//! Error types for Spendbook

use hyper::StatusCode;

/// Failure of a physical connection attempt to the document store.
///
/// Every caller that joined the same connect episode receives an equal value,
/// so the type is cheap to clone and comparable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection attempt timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("connection refused by store: {0}")]
    Refused(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl ConnectionError {
    /// Short machine-readable code used in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "CONNECTION_TIMEOUT",
            Self::Refused(_) => "CONNECTION_REFUSED",
            Self::Unavailable(_) => "CONNECTION_UNAVAILABLE",
        }
    }
}

/// Main error type for Spendbook operations
#[derive(Debug, thiserror::Error)]
pub enum SpendbookError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl SpendbookError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Machine-readable error code for response bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Connection(e) => e.code(),
            Self::Database(_) => "DB_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Http(_) => "BAD_REQUEST",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
        }
    }
}

impl From<std::io::Error> for SpendbookError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for SpendbookError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for SpendbookError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<bson::oid::Error> for SpendbookError {
    fn from(err: bson::oid::Error) -> Self {
        Self::BadRequest(format!("Invalid id: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for SpendbookError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for Spendbook operations
pub type Result<T> = std::result::Result<T, SpendbookError>;
