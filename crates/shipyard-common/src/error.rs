//! Unified error types for the Shipyard workspace.
//!
//! [`EngineError`] describes a single failed call against the container
//! engine. [`ShipyardError`] is what the library surfaces to callers and
//! encodes how a failure must be treated: fatal at construction,
//! unrecoverable setup precondition, or a plain operation failure.
//! Best-effort cleanup failures never reach this type; they are logged
//! where they happen.

use std::path::PathBuf;

use thiserror::Error;

/// A failed call against the container engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The addressed resource does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The engine answered with an error status.
    #[error("engine returned status {status}: {message}")]
    Api {
        /// HTTP-like status code reported by the engine.
        status: u16,
        /// Message reported by the engine.
        message: String,
    },

    /// The engine could not be reached or the response was unreadable.
    #[error("engine transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The call was abandoned because its cancellation token fired.
    #[error("engine call cancelled")]
    Cancelled,
}

impl EngineError {
    /// Returns whether the engine reported the resource as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns whether the call was abandoned through cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Convenience alias for engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ShipyardError {
    /// The engine could not be reached while creating a session.
    #[error("cannot connect to container engine: {source}")]
    Connect {
        /// Underlying engine failure.
        #[source]
        source: EngineError,
    },

    /// A listing that guards safe resource creation failed.
    #[error("setup precondition failed during {operation}: {source}")]
    Setup {
        /// Operation that could not be completed.
        operation: &'static str,
        /// Underlying engine failure.
        #[source]
        source: EngineError,
    },

    /// A single engine operation failed.
    #[error("{operation} failed: {source}")]
    Engine {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying engine failure.
        #[source]
        source: EngineError,
    },

    /// A wait condition was not met before its deadline.
    #[error("timeout - container {container} did not become {condition}")]
    Timeout {
        /// Name of the wait condition.
        condition: &'static str,
        /// Name or id of the awaited container.
        container: String,
    },

    /// The container has no exit code because it is still running.
    #[error("container {container} is running, it has no exit code yet")]
    ContainerRunning {
        /// Name of the container.
        container: String,
    },

    /// A followed log stream ended before the expected text appeared.
    #[error("log stream of {container} closed without finding '{needle}'")]
    LogClosed {
        /// Name of the container.
        container: String,
        /// Text that was searched for.
        needle: String,
    },

    /// The session was already cleaned up.
    #[error("session {id} is closed")]
    SessionClosed {
        /// Identifier of the closed session.
        id: String,
    },

    /// The session's root cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl ShipyardError {
    /// Wraps an engine failure of `operation`, keeping cancellation distinct.
    #[must_use]
    pub fn engine(operation: &'static str, source: EngineError) -> Self {
        if source.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Engine { operation, source }
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ShipyardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_detected() {
        let err = EngineError::NotFound {
            kind: "container",
            id: "abc".into(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "container not found: abc");
    }

    #[test]
    fn cancelled_engine_error_maps_to_cancelled() {
        let err = ShipyardError::engine("stop container", EngineError::Cancelled);
        assert!(matches!(err, ShipyardError::Cancelled));
    }

    #[test]
    fn engine_error_keeps_operation() {
        let err = ShipyardError::engine(
            "start container",
            EngineError::Api {
                status: 500,
                message: "boom".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "start container failed: engine returned status 500: boom"
        );
    }

    #[test]
    fn timeout_message_names_condition() {
        let err = ShipyardError::Timeout {
            condition: "healthy",
            container: "db".into(),
        };
        assert_eq!(err.to_string(), "timeout - container db did not become healthy");
    }
}
