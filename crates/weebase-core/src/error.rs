//! Error types for Weebase

use thiserror::Error;

/// Core error type for Weebase operations
#[derive(Error, Debug)]
pub enum WeebaseError {
    /// Malformed or missing input, rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unsupported dialect or malformed connection settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Open or ping failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Blocked by safe mode, read-only mode, or the single-row guard
    #[error("Safety violation: {0}")]
    SafetyViolation(String),

    /// The database rejected a statement
    #[error("{operation} failed: {message}")]
    Execution { operation: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl WeebaseError {
    /// Wrap a driver failure with the name of the operation that produced it
    pub fn execution(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Execution {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Short machine-friendly label for the error category
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Configuration(_) => "configuration",
            Self::Connection(_) => "connection",
            Self::SafetyViolation(_) => "safety_violation",
            Self::Execution { .. } => "execution",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::NotSupported(_) => "not_supported",
            Self::NotFound(_) => "not_found",
        }
    }

    pub fn is_safety_violation(&self) -> bool {
        matches!(self, Self::SafetyViolation(_))
    }
}

/// Result type alias for Weebase operations
pub type Result<T> = std::result::Result<T, WeebaseError>;
