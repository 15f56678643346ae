//! Test sessions: the owner of every resource a test creates.
//!
//! A [`Session`] labels each container and network it creates with the
//! domain marker and its own id. Cleaning up a session reclaims exactly
//! those resources; [`Session::sweep_remains`] reclaims whatever earlier
//! runs left behind.
//!
//! Sessions are cheap to clone. Clones share the id, the engine, the root
//! cancellation token and the lifecycle state.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use shipyard_common::config::SessionConfig;
use shipyard_common::constants::KILL_SIGNAL;
use shipyard_common::error::{EngineError, Result, ShipyardError};
use shipyard_common::labels::{LabelFilter, session_labels};
use shipyard_common::types::{SessionId, SessionState};
use shipyard_engine::EngineClient;
use shipyard_engine::docker::DockerEngine;
use shipyard_runtime::dump;
use shipyard_runtime::{Cleaner, CleanupReport, Deadline, WaitCondition, Waiter};
use tokio_util::sync::CancellationToken;

use crate::builder::ContainerBuilder;
use crate::container::Container;
use crate::network::NetworkBuilder;

/// How a container came to a halt in [`Session::wait_for_exit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The container stopped on its own.
    Exited,
    /// The container outlived the timeout and was killed.
    Killed,
}

struct Shared {
    id: SessionId,
    engine: Arc<dyn EngineClient>,
    config: SessionConfig,
    root: CancellationToken,
    state: AtomicU8,
    log_dir: Mutex<Option<PathBuf>>,
    started_at: DateTime<Utc>,
}

/// A functional test's handle on the container engine.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("started_at", &self.shared.started_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Opens a session on the local Docker engine.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::Connect`] if the engine cannot be reached.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let engine = DockerEngine::connect_local().map_err(|source| ShipyardError::Connect { source })?;
        Self::with_engine(Arc::new(engine), config).await
    }

    /// Opens a session with a fresh id on any engine.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::Connect`] if the engine does not answer a
    /// ping.
    pub async fn with_engine(engine: Arc<dyn EngineClient>, config: SessionConfig) -> Result<Self> {
        Self::open(SessionId::generate(), engine, config).await
    }

    /// Attaches to the resources of an existing session id, typically to
    /// clean up after a run that crashed.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::Connect`] if the engine does not answer a
    /// ping.
    pub async fn resume(
        id: SessionId,
        engine: Arc<dyn EngineClient>,
        config: SessionConfig,
    ) -> Result<Self> {
        Self::open(id, engine, config).await
    }

    async fn open(id: SessionId, engine: Arc<dyn EngineClient>, config: SessionConfig) -> Result<Self> {
        let root = CancellationToken::new();
        engine
            .ping(&root)
            .await
            .map_err(|source| ShipyardError::Connect { source })?;

        let started_at = Utc::now();
        tracing::info!(session = %id, started_at = %started_at.to_rfc3339(), "session opened");
        let log_dir = config.log_dir.clone();
        Ok(Self {
            shared: Arc::new(Shared {
                id,
                engine,
                config,
                root,
                state: AtomicU8::new(SessionState::Created.as_u8()),
                log_dir: Mutex::new(log_dir),
                started_at,
            }),
        })
    }

    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Returns when the session was opened.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    /// Returns the labels put on every resource of this session.
    #[must_use]
    pub fn labels(&self) -> HashMap<String, String> {
        session_labels(&self.shared.id)
    }

    /// Selects the resources of this session.
    #[must_use]
    pub fn session_filter(&self) -> LabelFilter {
        LabelFilter::session(&self.shared.id)
    }

    /// Selects the resources of every session.
    #[must_use]
    pub fn domain_filter(&self) -> LabelFilter {
        LabelFilter::domain()
    }

    /// Returns the session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Returns the engine client.
    #[must_use]
    pub fn engine(&self) -> Arc<dyn EngineClient> {
        Arc::clone(&self.shared.engine)
    }

    /// Returns the root token every engine call and wait is bound to.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.shared.root
    }

    /// Cancels all in-flight engine calls and waits of the session.
    ///
    /// Cleanup still works on a cancelled session.
    pub fn cancel(&self) {
        if !self.shared.root.is_cancelled() {
            tracing::info!(session = %self.shared.id, "session cancelled");
        }
        self.shared.root.cancel();
    }

    /// Returns the directory diagnostic dumps are written to.
    #[must_use]
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.shared
            .log_dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets the directory diagnostic dumps are written to, creating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn set_log_dir(&self, dir: impl Into<PathBuf>) -> Result<()> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| ShipyardError::Io {
            path: dir.clone(),
            source: e,
        })?;
        *self
            .shared
            .log_dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(dir);
        Ok(())
    }

    /// Starts configuring a container of this session.
    #[must_use]
    pub fn new_container_builder(&self) -> ContainerBuilder {
        ContainerBuilder::new(self.clone())
    }

    /// Starts configuring a bridge network with engine-chosen addressing.
    #[must_use]
    pub fn create_basic_network(&self, name: impl Into<String>) -> NetworkBuilder {
        NetworkBuilder::new(self.clone(), name)
    }

    /// Starts configuring a bridge network on `subnet`, allocating
    /// container addresses from `ip_range`.
    #[must_use]
    pub fn create_simple_network(
        &self,
        name: impl Into<String>,
        subnet: impl Into<String>,
        ip_range: impl Into<String>,
    ) -> NetworkBuilder {
        NetworkBuilder::new(self.clone(), name).subnet(subnet, ip_range)
    }

    /// Starts all given containers at once.
    ///
    /// Every container is attempted regardless of the others.
    ///
    /// # Errors
    ///
    /// Returns the error of the last failing container, in argument order.
    /// Earlier errors are logged and dropped.
    pub async fn start_containers(&self, containers: &[&Container]) -> Result<()> {
        let results = futures::future::join_all(containers.iter().map(|c| c.start())).await;
        let mut last = None;
        for (container, result) in containers.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(container = %container.name(), error = %e, "could not start container");
                last = Some(e);
            }
        }
        last.map_or(Ok(()), Err)
    }

    /// Waits for `container` to stop, killing it once `timeout` passes.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::Cancelled`] if the session is cancelled
    /// first, or an error if the kill fails.
    pub async fn wait_for_exit(&self, container: &Container, timeout: Duration) -> Result<ExitOutcome> {
        let deadline = Deadline::after(container.token(), timeout);
        if self
            .waiter()
            .wait(&WaitCondition::FADED_AWAY, container.id(), &deadline)
            .await
        {
            return Ok(ExitOutcome::Exited);
        }
        if deadline.token().is_cancelled() {
            return Err(ShipyardError::Cancelled);
        }

        tracing::warn!(container = %container.name(), ?timeout, "container did not exit in time, killing it");
        match self
            .shared
            .engine
            .kill_container(container.id(), KILL_SIGNAL, &self.shared.root)
            .await
        {
            Ok(()) => Ok(ExitOutcome::Killed),
            // Exited or vanished between the last poll and the kill.
            Err(e) if e.is_not_found() || matches!(e, EngineError::Api { status: 409, .. }) => {
                Ok(ExitOutcome::Exited)
            }
            Err(e) => Err(ShipyardError::engine("kill container", e)),
        }
    }

    /// Waits for the health check of `container` to report healthy.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::Timeout`] if it is not healthy within
    /// `timeout`, or [`ShipyardError::Cancelled`] if the session is
    /// cancelled first.
    pub async fn wait_for_healthy(&self, container: &Container, timeout: Duration) -> Result<()> {
        let deadline = Deadline::after(container.token(), timeout);
        if self
            .waiter()
            .wait(&WaitCondition::HEALTHY, container.id(), &deadline)
            .await
        {
            return Ok(());
        }
        if deadline.token().is_cancelled() {
            return Err(ShipyardError::Cancelled);
        }
        Err(ShipyardError::Timeout {
            condition: WaitCondition::HEALTHY.name(),
            container: container.name().to_string(),
        })
    }

    /// Waits for a line of `container`'s output to contain `needle`.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::Timeout`] after `timeout`,
    /// [`ShipyardError::LogClosed`] if the output ends first, and
    /// [`ShipyardError::Cancelled`] if the session is cancelled first.
    pub async fn wait_for_log(&self, container: &Container, needle: &str, timeout: Duration) -> Result<()> {
        let deadline = Deadline::after(container.token(), timeout);
        self.waiter()
            .wait_for_log(container.id(), needle, &deadline)
            .await
    }

    /// Stops and removes every container and network of this session.
    ///
    /// Failures are logged and reported, never raised. Cleaning up a closed
    /// session does nothing.
    pub async fn cleanup(&self) -> CleanupReport {
        let previous = SessionState::from_u8(
            self.shared
                .state
                .swap(SessionState::Cleaning.as_u8(), Ordering::AcqRel),
        );
        if previous == SessionState::Closed {
            self.shared
                .state
                .store(SessionState::Closed.as_u8(), Ordering::Release);
            tracing::info!(session = %self.shared.id, "session already cleaned up");
            return CleanupReport::empty();
        }

        tracing::info!(session = %self.shared.id, "cleaning up session");
        let report = self.cleaner().clean(&self.session_filter()).await;
        self.shared
            .state
            .store(SessionState::Closed.as_u8(), Ordering::Release);
        report
    }

    /// Stops and removes every labeled container and network, whichever
    /// session created it.
    ///
    /// Meant to run before a test suite, to reclaim what crashed runs left.
    pub async fn sweep_remains(&self) -> CleanupReport {
        tracing::info!(session = %self.shared.id, "sweeping remains of earlier sessions");
        self.cleaner().clean(&self.domain_filter()).await
    }

    /// Runs `body` with this session, then cleans the session up.
    ///
    /// Cleanup also runs when `body` panics; the panic is resumed
    /// afterwards.
    pub async fn scope<F, Fut, T>(self, body: F) -> T
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(body(self.clone())).catch_unwind().await;
        let _ = self.cleanup().await;
        match outcome {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Writes the inspect document of each container to the log directory.
    ///
    /// Returns the files written. Failures are logged and skipped.
    pub async fn dump_inspect(&self, containers: &[&Container]) -> Vec<PathBuf> {
        let Some(dir) = self.dump_dir() else {
            return Vec::new();
        };
        let mut written = Vec::new();
        for container in containers {
            match dump::dump_inspect(
                self.shared.engine.as_ref(),
                container.id(),
                container.name(),
                &dir,
                &self.shared.root,
            )
            .await
            {
                Ok(path) => written.push(path),
                Err(e) => tracing::warn!(container = %container.name(), error = %e, "could not dump inspect document"),
            }
        }
        written
    }

    /// Writes the output of each container to the log directory.
    ///
    /// Returns the files written. Failures are logged and skipped.
    pub async fn dump_container_logs(&self, containers: &[&Container]) -> Vec<PathBuf> {
        let Some(dir) = self.dump_dir() else {
            return Vec::new();
        };
        let mut written = Vec::new();
        for container in containers {
            match dump::dump_container_log(
                self.shared.engine.as_ref(),
                container.id(),
                container.name(),
                &dir,
                container.token(),
            )
            .await
            {
                Ok(path) => written.push(path),
                Err(e) => tracing::warn!(container = %container.name(), error = %e, "could not dump container log"),
            }
        }
        written
    }

    /// Writes the framed output of each container to `writer`, for example
    /// to show it next to a failed assertion.
    ///
    /// Failures are logged and skipped.
    pub async fn write_container_logs<W: Write + Send>(&self, containers: &[&Container], writer: &mut W) {
        for container in containers {
            let log = match container.logs().await {
                Ok(log) => log,
                Err(e) => {
                    tracing::warn!(container = %container.name(), error = %e, "could not read container log");
                    continue;
                }
            };
            if let Err(e) = dump::write_log(writer, container.name(), &log) {
                tracing::warn!(container = %container.name(), error = %e, "could not write container log");
                return;
            }
        }
    }

    fn dump_dir(&self) -> Option<PathBuf> {
        let dir = self.log_dir();
        if dir.is_none() {
            tracing::warn!(session = %self.shared.id, "no log directory set, skipping dump");
        }
        dir
    }

    fn waiter(&self) -> Waiter {
        Waiter::new(self.engine(), self.shared.config.polling_interval())
    }

    pub(crate) fn cleaner(&self) -> Cleaner {
        Cleaner::new(self.engine(), self.waiter(), self.shared.root.clone())
            .with_stop_timeout(self.shared.config.stop_timeout())
            .with_fade_timeout(self.shared.config.fade_timeout())
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.state() {
            SessionState::Cleaning | SessionState::Closed => Err(ShipyardError::SessionClosed {
                id: self.shared.id.to_string(),
            }),
            SessionState::Created | SessionState::Active => Ok(()),
        }
    }

    pub(crate) fn mark_active(&self) {
        let _ = self.shared.state.compare_exchange(
            SessionState::Created.as_u8(),
            SessionState::Active.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

