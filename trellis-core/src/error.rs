// Error types for the Trellis framework

use http::StatusCode;
use thiserror::Error;

/// Result alias used throughout trellis-core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Container errors
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Circular dependency detected: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("Scope violation: {0}")]
    ScopeViolation(String),

    #[error("Lifecycle hook failed: {0}")]
    Lifecycle(String),

    // Pipeline outcomes
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// An error that carries its own HTTP status.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client-facing outcome class of a finished request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Denied,
    NotFound,
    ClientError,
    ServerError,
}

impl Outcome {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Outcome::Denied,
            404 => Outcome::NotFound,
            400..=499 => Outcome::ClientError,
            500..=599 => Outcome::ServerError,
            _ => Outcome::Success,
        }
    }
}

impl Error {
    /// Build an error with an explicit status code.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Error::Status {
            status,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RouteNotFound(_) => StatusCode::NOT_FOUND.as_u16(),
            Error::Forbidden(_) => StatusCode::FORBIDDEN.as_u16(),
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED.as_u16(),
            Error::Validation(_) | Error::BadRequest(_) | Error::Deserialization(_) => {
                StatusCode::BAD_REQUEST.as_u16()
            }
            Error::Status { status, .. } => StatusCode::from_u16(*status)
                .map(|s| s.as_u16())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR.as_u16()),

            // Container failures surfacing during a request are wiring bugs
            _ => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }

    /// Outcome class this error produces when it reaches the HTTP engine.
    pub fn outcome(&self) -> Outcome {
        Outcome::from_status(self.status_code())
    }

    /// Whether this error is an access-denied outcome.
    pub fn is_denied(&self) -> bool {
        self.outcome() == Outcome::Denied
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}
