//! Domain primitive types used across the Shipyard workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of a test session.
///
/// Generated ids are UUID v4 values, so sessions started concurrently by
/// separate processes never share an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, globally unique session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container run status understood by engine list filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// The container's main process is running.
    Running,
    /// The container has been started and its process has exited.
    Exited,
}

impl ContainerStatus {
    /// Returns the engine's name for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Exited => "exited",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Session exists but has not created any resource yet.
    Created,
    /// At least one resource was created through the session.
    Active,
    /// Cleanup is in progress.
    Cleaning,
    /// Cleanup finished; the session must not be used anymore.
    Closed,
}

impl SessionState {
    /// Decodes the compact representation used for atomic storage.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Active,
            2 => Self::Cleaning,
            _ => Self::Closed,
        }
    }

    /// Encodes the state for atomic storage.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Active => 1,
            Self::Cleaning => 2,
            Self::Closed => 3,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Cleaning => write!(f, "cleaning"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_ids_differ() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn session_state_roundtrips_through_u8() {
        for state in [
            SessionState::Created,
            SessionState::Active,
            SessionState::Cleaning,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn container_status_names_match_engine() {
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert_eq!(ContainerStatus::Exited.to_string(), "exited");
    }
}
