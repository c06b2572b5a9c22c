use thiserror::Error;
use weebase_core::WeebaseError;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service-level errors, one variant per failure class so callers can map
/// them to responses without inspecting messages
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Blocked by safety policy: {0}")]
    SafetyViolation(String),

    #[error("{operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Short machine-friendly label for the error category
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "validation",
            Self::Configuration(_) => "configuration",
            Self::ConnectionFailed(_) | Self::NotConnected => "connection",
            Self::SafetyViolation(_) => "safety_violation",
            Self::OperationFailed { .. } => "execution",
            Self::NotFound(_) => "not_found",
            Self::NotSupported(_) => "not_supported",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status a web front end should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::Configuration(_) => 400,
            Self::NotConnected => 409,
            Self::SafetyViolation(_) => 403,
            Self::NotFound(_) => 404,
            Self::NotSupported(_) => 501,
            Self::ConnectionFailed(_) => 502,
            Self::OperationFailed { .. } | Self::Internal(_) => 500,
        }
    }
}

impl From<WeebaseError> for ServiceError {
    fn from(err: WeebaseError) -> Self {
        match err {
            WeebaseError::Validation(msg) => Self::InvalidRequest(msg),
            WeebaseError::Configuration(msg) => Self::Configuration(msg),
            WeebaseError::Connection(msg) => Self::ConnectionFailed(msg),
            WeebaseError::SafetyViolation(msg) => Self::SafetyViolation(msg),
            WeebaseError::Execution { operation, message } => {
                Self::OperationFailed { operation, message }
            }
            WeebaseError::NotFound(msg) => Self::NotFound(msg),
            WeebaseError::NotSupported(msg) => Self::NotSupported(msg),
            err @ (WeebaseError::Io(_) | WeebaseError::Serialization(_)) => {
                Self::Internal(err.to_string())
            }
        }
    }
}
