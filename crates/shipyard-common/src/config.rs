//! Session configuration model.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, ShipyardError};

/// Tunables of a test session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory receiving inspect and log dumps.
    pub log_dir: Option<PathBuf>,
    /// Grace period granted to a container on stop, in seconds.
    pub stop_timeout_secs: u64,
    /// Pause between two inspections while waiting, in milliseconds.
    pub polling_interval_ms: u64,
    /// Deadline for a stopped container to fade away during cleanup, in seconds.
    pub fade_timeout_secs: u64,
    /// Driver for networks created by the session.
    pub network_driver: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            stop_timeout_secs: constants::DEFAULT_STOP_TIMEOUT_SECS,
            polling_interval_ms: constants::DEFAULT_POLLING_INTERVAL_MS,
            fade_timeout_secs: constants::DEFAULT_FADE_TIMEOUT_SECS,
            network_driver: constants::DEFAULT_NETWORK_DRIVER.to_string(),
        }
    }
}

impl SessionConfig {
    /// Loads a configuration from a YAML file.
    ///
    /// Missing keys fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ShipyardError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ShipyardError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Builds a configuration from defaults overridden by `SHIPYARD_*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(dir) = lookup(constants::ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(ms) = lookup(constants::ENV_POLLING_INTERVAL_MS) {
            self.polling_interval_ms = parse_number(constants::ENV_POLLING_INTERVAL_MS, &ms)?;
        }
        if let Some(secs) = lookup(constants::ENV_STOP_TIMEOUT_SECS) {
            self.stop_timeout_secs = parse_number(constants::ENV_STOP_TIMEOUT_SECS, &secs)?;
        }
        Ok(self)
    }

    /// Returns the stop grace period.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Returns the polling interval.
    #[must_use]
    pub const fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Returns the cleanup fade-away deadline.
    #[must_use]
    pub const fn fade_timeout(&self) -> Duration {
        Duration::from_secs(self.fade_timeout_secs)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| ShipyardError::Config {
        message: format!("{key} must be a non-negative integer, got '{value}'"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.stop_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.polling_interval(), Duration::from_secs(1));
        assert_eq!(cfg.fade_timeout(), Duration::from_secs(20));
        assert_eq!(cfg.network_driver, "bridge");
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn load_yaml_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shipyard.yaml");
        std::fs::write(&path, "polling_interval_ms: 250\nlog_dir: /tmp/dumps\n").expect("write");

        let cfg = SessionConfig::load(&path).expect("load");
        assert_eq!(cfg.polling_interval(), Duration::from_millis(250));
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/tmp/dumps")));
        assert_eq!(cfg.stop_timeout_secs, 10);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = SessionConfig::load(Path::new("/nonexistent/shipyard.yaml")).unwrap_err();
        assert!(matches!(err, ShipyardError::Io { .. }));
    }

    #[test]
    fn env_overrides_are_applied() {
        let env = HashMap::from([
            (constants::ENV_LOG_DIR, "/var/tmp/logs"),
            (constants::ENV_POLLING_INTERVAL_MS, "50"),
        ]);
        let cfg = SessionConfig::default()
            .with_env_overrides(|k| env.get(k).map(ToString::to_string))
            .expect("overrides");
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/var/tmp/logs")));
        assert_eq!(cfg.polling_interval_ms, 50);
    }

    #[test]
    fn invalid_env_number_is_config_error() {
        let err = SessionConfig::default()
            .with_env_overrides(|k| (k == constants::ENV_STOP_TIMEOUT_SECS).then(|| "soon".into()))
            .unwrap_err();
        assert!(matches!(err, ShipyardError::Config { .. }));
    }
}
