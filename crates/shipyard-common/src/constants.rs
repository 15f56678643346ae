//! System-wide constants and defaults.

/// Label key marking every resource created by Shipyard.
pub const DOMAIN_LABEL_KEY: &str = "io.shipyard.domain";

/// Value of the domain-marker label.
pub const DOMAIN_LABEL_VALUE: &str = "functional-test";

/// Label key carrying the id of the session that created a resource.
pub const SESSION_LABEL_KEY: &str = "io.shipyard.session";

/// Seconds the engine waits after SIGTERM before killing a stopping container.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Pause between two inspections of a polled container.
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1000;

/// Deadline for a stopped container to be observed as gone during cleanup.
pub const DEFAULT_FADE_TIMEOUT_SECS: u64 = 20;

/// Driver used for networks created by a session.
pub const DEFAULT_NETWORK_DRIVER: &str = "bridge";

/// Interval between two runs of a container health check.
pub const HEALTH_CHECK_INTERVAL_MS: u64 = 200;

/// Consecutive failures before a container is reported unhealthy.
pub const HEALTH_CHECK_RETRIES: i64 = 20;

/// Health status reported by the engine once a check passes.
pub const HEALTHY_STATUS: &str = "healthy";

/// Signal used when a container does not exit in time.
pub const KILL_SIGNAL: &str = "SIGKILL";

/// Environment variable overriding the dump directory.
pub const ENV_LOG_DIR: &str = "SHIPYARD_LOG_DIR";

/// Environment variable overriding the polling interval in milliseconds.
pub const ENV_POLLING_INTERVAL_MS: &str = "SHIPYARD_POLLING_INTERVAL_MS";

/// Environment variable overriding the stop timeout in seconds.
pub const ENV_STOP_TIMEOUT_SECS: &str = "SHIPYARD_STOP_TIMEOUT_SECS";
