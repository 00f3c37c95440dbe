//! # Error Types
//!
//! Stable error codes and the per-concern error enums used throughout the client
//! runtime. Every failure that reaches a caller carries an [`ErrorCode`] so the
//! presentation layer can decide whether a retry affordance makes sense.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Normalized outcome of a single logical request.
pub type RequestOutcome<T> = Result<T, RequestError>;

/// Result type for orchestrator operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for streaming channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Stable, machine-readable failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A single attempt exceeded the request timeout
    TimeoutError,
    /// Input rejected locally or by the server with a 4xx response
    ValidationFailed,
    /// Backend unreachable: connection refused, reset, or host not found
    ServiceUnavailable,
    /// Server responded with a 5xx status
    ServiceError,
    /// Any other transport failure, including malformed response bodies
    NetworkError,
    /// File upload rejected or failed in transit
    UploadFailed,
    /// Analysis reported failure by the backend
    AnalysisFailed,
    /// A session exceeded its overall time budget
    WorkflowTimeout,
    /// Backend reported a status this client does not recognize
    UnknownStatus,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::ServiceError => "SERVICE_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::UploadFailed => "UPLOAD_FAILED",
            Self::AnalysisFailed => "ANALYSIS_FAILED",
            Self::WorkflowTimeout => "WORKFLOW_TIMEOUT",
            Self::UnknownStatus => "UNKNOWN_STATUS",
        }
    }

    /// Whether repeating the same operation may succeed.
    ///
    /// Validation failures and unrecognized statuses will fail identically on a
    /// second try; everything else is a transient or environmental condition.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ValidationFailed | Self::UnknownStatus)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TIMEOUT_ERROR" => Ok(Self::TimeoutError),
            "VALIDATION_FAILED" => Ok(Self::ValidationFailed),
            "SERVICE_UNAVAILABLE" => Ok(Self::ServiceUnavailable),
            "SERVICE_ERROR" => Ok(Self::ServiceError),
            "NETWORK_ERROR" => Ok(Self::NetworkError),
            "UPLOAD_FAILED" => Ok(Self::UploadFailed),
            "ANALYSIS_FAILED" => Ok(Self::AnalysisFailed),
            "WORKFLOW_TIMEOUT" => Ok(Self::WorkflowTimeout),
            "UNKNOWN_STATUS" => Ok(Self::UnknownStatus),
            _ => Err(format!("Invalid error code: {s}")),
        }
    }
}

/// Failure of a logical request after retries were exhausted or skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RequestError {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status when the server answered at all
    pub status: Option<u16>,
    /// Number of transport attempts made (0 when served without network)
    pub attempts: u32,
}

impl RequestError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            attempts: 0,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// Errors returned by the upload and analysis orchestrators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("An operation for {key} is already in flight")]
    AlreadyInFlight { key: String },

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Unrecognized backend status: {status}")]
    UnknownStatus { status: String },

    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Session {session_id} is {status}, operation not allowed")]
    InvalidState { session_id: String, status: String },
}

impl SessionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(session_id: impl Into<String>) -> Self {
        Self::NotFound {
            session_id: session_id.into(),
        }
    }

    /// Stable code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_)
            | Self::AlreadyInFlight { .. }
            | Self::NotFound { .. }
            | Self::InvalidState { .. } => ErrorCode::ValidationFailed,
            Self::Request(err) => err.code,
            Self::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            Self::UnknownStatus { .. } => ErrorCode::UnknownStatus,
        }
    }
}

impl From<StateMachineError> for SessionError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::UnknownStatus(status) => Self::UnknownStatus { status },
        }
    }
}

/// Lifecycle status mapping errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    #[error("Unrecognized status value: {0}")]
    UnknownStatus(String),
}

/// Streaming channel failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Invalid channel URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Channel connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigurationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failures while assembling a [`crate::runtime::ClientRuntime`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to build HTTP transport: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
