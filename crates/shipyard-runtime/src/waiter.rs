//! Polling until a container reaches a wanted state.
//!
//! The [`Waiter`] inspects a container once per polling interval and
//! evaluates a [`WaitCondition`] against the result, until the condition
//! holds or the [`Deadline`] passes. Escalation on timeout (killing the
//! container, failing a test) is left to the caller.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use shipyard_common::constants::HEALTHY_STATUS;
use shipyard_common::error::{EngineResult, Result, ShipyardError};
use shipyard_engine::EngineClient;
use shipyard_engine::client::InspectSnapshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A named predicate over an inspection result.
#[derive(Debug, Clone, Copy)]
pub struct WaitCondition {
    name: &'static str,
    check: fn(&EngineResult<InspectSnapshot>) -> bool,
}

impl WaitCondition {
    /// The container is gone or no longer running.
    pub const FADED_AWAY: Self = Self::new("faded away", has_faded_away);

    /// The container's health check reports healthy.
    pub const HEALTHY: Self = Self::new("healthy", is_healthy);

    /// Pairs a predicate with the name used when reporting on it.
    #[must_use]
    pub const fn new(name: &'static str, check: fn(&EngineResult<InspectSnapshot>) -> bool) -> Self {
        Self { name, check }
    }

    /// Returns the condition's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Evaluates the condition.
    #[must_use]
    pub fn is_met(&self, inspection: &EngineResult<InspectSnapshot>) -> bool {
        (self.check)(inspection)
    }
}

/// Not-found counts as faded away.
fn has_faded_away(inspection: &EngineResult<InspectSnapshot>) -> bool {
    match inspection {
        Ok(snapshot) => !snapshot.running,
        Err(err) => err.is_not_found(),
    }
}

/// A container without health check is never healthy.
fn is_healthy(inspection: &EngineResult<InspectSnapshot>) -> bool {
    inspection
        .as_ref()
        .is_ok_and(|s| s.health.as_deref() == Some(HEALTHY_STATUS))
}

/// Roughly 30 years; stands in for deadlines that do not fit an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn expiry(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Point in time after which a wait gives up, bound to a cancellation token.
///
/// The token is a child of the session's root token, so cancelling the
/// session ends every wait derived from it.
#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    expires_at: Instant,
}

impl Deadline {
    /// Creates a deadline `timeout` from now, cancelled along with `parent`.
    ///
    /// Timeouts too large to represent, such as [`Duration::MAX`], wait for
    /// about thirty years.
    #[must_use]
    pub fn after(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            expires_at: expiry(timeout),
        }
    }

    /// Returns the token engine calls made under this deadline use.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns when the deadline expires.
    #[must_use]
    pub const fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Returns whether the deadline passed or was cancelled.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.expires_at
    }
}

/// Polls container state through the engine.
#[derive(Clone)]
pub struct Waiter {
    engine: Arc<dyn EngineClient>,
    interval: Duration,
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Waiter {
    /// Creates a waiter pausing `interval` between two inspections.
    #[must_use]
    pub fn new(engine: Arc<dyn EngineClient>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Returns the polling interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Blocks until `condition` holds for `container_id` or `deadline` passes.
    ///
    /// Returns `true` when the condition was met and `false` on timeout or
    /// cancellation. The deadline is checked once per iteration, after the
    /// inspection, so a wait may overshoot by one polling interval.
    pub async fn wait(
        &self,
        condition: &WaitCondition,
        container_id: &str,
        deadline: &Deadline,
    ) -> bool {
        loop {
            let inspection = self
                .engine
                .inspect_container(container_id, deadline.token())
                .await;
            if condition.is_met(&inspection) {
                tracing::debug!(container = container_id, condition = condition.name(), "condition met");
                return true;
            }
            if deadline.is_elapsed() {
                tracing::warn!(
                    container = container_id,
                    condition = condition.name(),
                    cancelled = deadline.token().is_cancelled(),
                    "waiting timed out"
                );
                return false;
            }
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = deadline.token().cancelled() => {}
            }
        }
    }

    /// Follows the container's output until a line contains `needle`.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::LogClosed`] if the stream ends first,
    /// [`ShipyardError::Timeout`] if the deadline passes,
    /// [`ShipyardError::Cancelled`] if the deadline's token is cancelled, and
    /// [`ShipyardError::Engine`] if reading the stream fails.
    pub async fn wait_for_log(
        &self,
        container_id: &str,
        needle: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        let mut stream = self
            .engine
            .container_logs(container_id, true, deadline.token());
        // Raw bytes after the last complete line; a character may straddle two chunks.
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                () = tokio::time::sleep_until(deadline.expires_at()) => {
                    return Err(ShipyardError::Timeout {
                        condition: "logged",
                        container: container_id.to_string(),
                    });
                }
                () = deadline.token().cancelled() => return Err(ShipyardError::Cancelled),
            };
            let Some(chunk) = next else {
                return if String::from_utf8_lossy(&pending).contains(needle) {
                    Ok(())
                } else {
                    Err(ShipyardError::LogClosed {
                        container: container_id.to_string(),
                        needle: needle.to_string(),
                    })
                };
            };
            let chunk = chunk.map_err(|e| ShipyardError::engine("read container log", e))?;
            pending.extend_from_slice(&chunk.bytes);
            if let Some(last_newline) = pending.iter().rposition(|&b| b == b'\n') {
                let complete = String::from_utf8_lossy(&pending[..last_newline]);
                if complete.lines().any(|line| line.contains(needle)) {
                    tracing::debug!(container = container_id, needle, "log line found");
                    return Ok(());
                }
                pending = pending.split_off(last_newline + 1);
            }
        }
    }
}
