//! Error types for the recovery subsystem
//!
//! Engine failures are part of every engine method's signature. The controller
//! converts them into outcomes; nothing here crosses the controller boundary.

use serde::Serialize;
use thiserror::Error;
use tt_types::TorrentId;

/// Failure reported by the download engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Torrent is not known to the engine
    #[error("Torrent {id} not found")]
    TorrentNotFound { id: TorrentId },

    /// Directory does not exist
    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    /// Directory exists but cannot be accessed
    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    /// Engine lacks the operation
    #[error("Operation not supported by engine: {operation}")]
    Unsupported { operation: String },

    /// Transport or engine-side failure
    #[error("Engine call {operation} failed: {message}")]
    Rpc { operation: String, message: String },
}

impl EngineError {
    /// Create a new RPC error
    pub fn rpc(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rpc {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Reason codes for rejected location input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationValidationReason {
    /// Nothing was entered
    PathRequired,
    /// Path is relative
    PathNotAbsolute,
}

impl LocationValidationReason {
    /// Stable reason code for UI messages
    pub fn code(&self) -> &'static str {
        match self {
            LocationValidationReason::PathRequired => "path_required",
            LocationValidationReason::PathNotAbsolute => "path_not_absolute",
        }
    }
}

impl std::fmt::Display for LocationValidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Recovery subsystem errors
#[derive(Error, Debug, Clone)]
pub enum RecoveryError {
    /// Engine call failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Background task ended abnormally
    #[error("Recovery task aborted: {0}")]
    TaskAborted(String),
}

impl RecoveryError {
    /// Create a new task-aborted error
    pub fn task_aborted(msg: impl Into<String>) -> Self {
        Self::TaskAborted(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::rpc("verify", "connection reset");
        assert_eq!(
            err.to_string(),
            "Engine call verify failed: connection reset"
        );
        let wrapped: RecoveryError = err.into();
        assert!(wrapped.to_string().contains("connection reset"));
    }

    #[test]
    fn test_validation_codes() {
        assert_eq!(
            LocationValidationReason::PathNotAbsolute.to_string(),
            "path_not_absolute"
        );
        assert_eq!(LocationValidationReason::PathRequired.code(), "path_required");
    }
}
