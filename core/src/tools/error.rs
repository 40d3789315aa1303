use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by every provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream rejected request: {0}")]
    UpstreamRejected(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Malformed upstream response: {0}")]
    Malformed(String),
}

/// Stable, serializable discriminant of [`ToolError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    Unauthorized,
    UpstreamUnavailable,
    UpstreamRejected,
    UpstreamError,
    Malformed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::UpstreamRejected => "upstream_rejected",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::Malformed => "malformed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::NotFound(_) => ErrorKind::NotFound,
            ToolError::Validation(_) => ErrorKind::ValidationError,
            ToolError::Unauthorized(_) => ErrorKind::Unauthorized,
            ToolError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            ToolError::UpstreamRejected(_) => ErrorKind::UpstreamRejected,
            ToolError::UpstreamError(_) => ErrorKind::UpstreamError,
            ToolError::Malformed(_) => ErrorKind::Malformed,
        }
    }

    /// Only network-level failures are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::UpstreamUnavailable(_))
    }

    /// The message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            ToolError::NotFound(m)
            | ToolError::Validation(m)
            | ToolError::Unauthorized(m)
            | ToolError::UpstreamUnavailable(m)
            | ToolError::UpstreamRejected(m)
            | ToolError::UpstreamError(m)
            | ToolError::Malformed(m) => m,
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
