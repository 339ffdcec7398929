//! Bridge types for commands and events.
//!
//! These types provide a stable API surface for the frontend,
//! hiding internal complexity.

use serde::{Deserialize, Serialize};
use specta::Type;

/// Snapshot of a supervised OS process returned to the frontend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHandle {
    /// OS process identifier
    pub pid: u32,
    /// Timestamp when the process was spawned (milliseconds since epoch)
    /// Using f64 for JavaScript number compatibility
    pub started_at_ms: f64,
    /// Whether the process has exited
    pub exited: bool,
    /// Exit code, once exited (None when killed by a signal)
    pub exit_code: Option<i32>,
}

/// API errors for frontend consumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Type)]
#[serde(tag = "type")]
pub enum ApiError {
    /// Invalid input parameter
    InvalidInput { message: String },
    /// Inbound envelope could not be decoded
    DecodeError { message: String },
    /// Inbound envelope carried a type with no handler
    UnsupportedType { message_type: String },
    /// Tool executable missing at its install-relative path
    ToolNotFound { path: String },
    /// Tool exited with a non-zero code
    ToolExecutionFailed {
        exit_code: Option<i32>,
        message: String,
    },
    /// No release asset matched the requested pattern
    NoMatchingAsset { pattern: String },
    /// Release feed or download request failed
    HttpFailure { status: Option<u16>, message: String },
    /// Installer path is missing or not a file
    InvalidInstallerPath { path: String },
    /// IO error during temp file, state file or process operation
    IoFailure { message: String },
    /// Another update install is already running
    UpdateInProgress,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::InvalidInput { message } => write!(f, "{message}"),
            ApiError::DecodeError { message } => write!(f, "Invalid message: {message}"),
            ApiError::UnsupportedType { message_type } => {
                write!(f, "Unsupported message type: {message_type}")
            }
            ApiError::ToolNotFound { path } => write!(f, "CLI not found: {path}"),
            ApiError::ToolExecutionFailed { message, .. } => write!(f, "{message}"),
            ApiError::NoMatchingAsset { pattern } => {
                write!(f, "No release asset matching '{pattern}'")
            }
            ApiError::HttpFailure {
                status: Some(status),
                message,
            } => write!(f, "HTTP {status}: {message}"),
            ApiError::HttpFailure {
                status: None,
                message,
            } => write!(f, "HTTP request failed: {message}"),
            ApiError::InvalidInstallerPath { path } => {
                write!(f, "Invalid installer path: {path}")
            }
            ApiError::IoFailure { message } => write!(f, "IO error: {message}"),
            ApiError::UpdateInProgress => write!(f, "An update is already in progress"),
        }
    }
}

impl std::error::Error for ApiError {}
