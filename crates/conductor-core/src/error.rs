//! Error types for the conductor.
//!
//! Most supervisor failures are narrated on the event channel rather than
//! returned; these variants cover the paths that do propagate to callers
//! (config loading, launching, inline restart/stop requests).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the conductor.
#[derive(Debug, Error)]
pub enum ConductorError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Process errors
    #[error("Process launch failed for {target}: {message}")]
    LaunchFailed { target: String, message: String },

    #[error("Launch prerequisites missing for {target}: interpreter={interpreter_found}, script={script_found}")]
    PrerequisitesMissing {
        target: String,
        interpreter_found: bool,
        script_found: bool,
    },

    #[error("Another {0} operation is already in flight")]
    OperationInFlight(String),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unknown service: {0}")]
    UnknownService(String),

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for conductor operations.
pub type Result<T> = std::result::Result<T, ConductorError>;

impl From<std::io::Error> for ConductorError {
    fn from(err: std::io::Error) -> Self {
        ConductorError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        ConductorError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<redis::RedisError> for ConductorError {
    fn from(err: redis::RedisError) -> Self {
        ConductorError::Network {
            message: err.to_string(),
            cause: err.code().map(str::to_string),
        }
    }
}

impl ConductorError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ConductorError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Network/connectivity error
    /// - -32003: Launch failed
    /// - -32005: Validation error
    /// - -32009: Operation already in flight
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            ConductorError::Network { .. } | ConductorError::Timeout(_) => -32000,

            ConductorError::LaunchFailed { .. } | ConductorError::PrerequisitesMissing { .. } => {
                -32003
            }

            ConductorError::UnknownService(_)
            | ConductorError::Validation { .. }
            | ConductorError::Config { .. } => -32005,

            ConductorError::OperationInFlight(_) => -32009,

            _ => -32603,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConductorError::LaunchFailed {
            target: "gary".into(),
            message: "spawn failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "Process launch failed for gary: spawn failed"
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            ConductorError::OperationInFlight("start".into()).to_rpc_error_code(),
            -32009
        );
        assert_eq!(
            ConductorError::UnknownService("nope".into()).to_rpc_error_code(),
            -32005
        );
        assert_eq!(ConductorError::Other("x".into()).to_rpc_error_code(), -32603);
    }

    #[test]
    fn test_redis_error_is_network_error() {
        let err: ConductorError =
            redis::RedisError::from((redis::ErrorKind::ResponseError, "NOAUTH", "auth required".to_string()))
                .into();
        assert!(matches!(err, ConductorError::Network { .. }));
        assert_eq!(err.to_rpc_error_code(), -32000);
    }
}
