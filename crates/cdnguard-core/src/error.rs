//! Error types for cdnguard

use std::time::Duration;

use thiserror::Error;

/// Result type alias using cdnguard's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cdnguard operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration loaded but failed validation
    #[error("Invalid configuration ({} problem(s)): {}", .0.len(), .0.join("; "))]
    InvalidConfig(Vec<String>),

    /// Key/value store error
    #[error("Store error: {0}")]
    Store(String),

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(String),

    /// A retryable failure talking to an external collaborator
    #[error("{operation} failed transiently: {message}")]
    Transient { operation: String, message: String },

    /// An external call did not finish in time
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Upstream answered with a non-success status
    #[error("{operation} returned {status}: {message}")]
    Upstream {
        operation: String,
        status: u16,
        message: String,
    },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Alert delivery failed
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a transient error for the named operation
    pub fn transient(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a dispatch error
    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Map an upstream HTTP status into an error, classifying 429 and 5xx as transient
    pub fn from_status(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let operation = operation.into();
        let message = body.into();
        if status == 429 || status >= 500 {
            Self::Transient {
                operation,
                message: format!("status {status}: {message}"),
            }
        } else {
            Self::Upstream {
                operation,
                status,
                message,
            }
        }
    }

    /// Whether retrying the failed operation can reasonably succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient { .. } | Self::Timeout { .. } | Self::Store(_) | Self::Redis(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Self::Redis(e.to_string())
    }
}
