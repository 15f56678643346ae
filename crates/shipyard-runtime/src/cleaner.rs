//! Best-effort reclamation of labeled engine resources.
//!
//! A full cleanup runs three phases strictly in order: stop running
//! containers, remove containers, remove networks. Inside a phase every
//! container gets its own task and the phase ends only when all of them
//! have finished. Failures are logged and counted, never retried, and never
//! stop sibling tasks or later phases.
//!
//! Engine calls made by the cleaner are not bound to the session token, so
//! a cancelled session can still be reclaimed. The fade-away waits of the
//! stop phase do follow the session token; once it fires, a stop the engine
//! accepted counts as done without being observed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use shipyard_common::constants::{DEFAULT_FADE_TIMEOUT_SECS, DEFAULT_STOP_TIMEOUT_SECS};
use shipyard_common::error::EngineResult;
use shipyard_common::labels::LabelFilter;
use shipyard_common::types::ContainerStatus;
use shipyard_engine::EngineClient;
use shipyard_engine::client::{NetworkSummary, RemoveOptions};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::waiter::{Deadline, WaitCondition, Waiter};

/// A cleanup phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Stopping running containers.
    StopContainers,
    /// Removing containers.
    RemoveContainers,
    /// Removing networks.
    RemoveNetworks,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopContainers => write!(f, "stop containers"),
            Self::RemoveContainers => write!(f, "remove containers"),
            Self::RemoveNetworks => write!(f, "remove networks"),
        }
    }
}

/// Outcome of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseReport {
    /// Phase this report covers.
    pub phase: Phase,
    /// Resources matched by the listing.
    pub matched: usize,
    /// Resources whose operation failed.
    pub failed: usize,
    /// Whether the listing failed and the phase was skipped.
    pub aborted: bool,
}

impl PhaseReport {
    const fn empty(phase: Phase) -> Self {
        Self {
            phase,
            matched: 0,
            failed: 0,
            aborted: false,
        }
    }

    const fn skipped(phase: Phase) -> Self {
        Self {
            phase,
            matched: 0,
            failed: 0,
            aborted: true,
        }
    }

    /// Resources handled successfully.
    #[must_use]
    pub const fn succeeded(&self) -> usize {
        self.matched - self.failed
    }

    /// Whether every matched resource was handled and the listing worked.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !self.aborted && self.failed == 0
    }
}

/// Outcome of a full three-phase cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    /// Stop phase.
    pub stop: PhaseReport,
    /// Container removal phase.
    pub remove: PhaseReport,
    /// Network removal phase.
    pub networks: PhaseReport,
}

impl CleanupReport {
    /// A report of a cleanup that had nothing to do.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            stop: PhaseReport::empty(Phase::StopContainers),
            remove: PhaseReport::empty(Phase::RemoveContainers),
            networks: PhaseReport::empty(Phase::RemoveNetworks),
        }
    }

    /// Whether all three phases were clean.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.stop.is_clean() && self.remove.is_clean() && self.networks.is_clean()
    }
}

/// Reclaims containers and networks selected by label filters.
#[derive(Clone)]
pub struct Cleaner {
    engine: Arc<dyn EngineClient>,
    waiter: Waiter,
    session: CancellationToken,
    calls: CancellationToken,
    stop_timeout: Duration,
    fade_timeout: Duration,
}

impl fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleaner")
            .field("waiter", &self.waiter)
            .field("stop_timeout", &self.stop_timeout)
            .field("fade_timeout", &self.fade_timeout)
            .finish_non_exhaustive()
    }
}

impl Cleaner {
    /// Creates a cleaner whose waits are bound to the `session` token.
    #[must_use]
    pub fn new(engine: Arc<dyn EngineClient>, waiter: Waiter, session: CancellationToken) -> Self {
        Self {
            engine,
            waiter,
            session,
            calls: CancellationToken::new(),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            fade_timeout: Duration::from_secs(DEFAULT_FADE_TIMEOUT_SECS),
        }
    }

    /// Sets the grace period passed to every stop call.
    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Sets how long a stopped container may take to be observed as gone.
    #[must_use]
    pub const fn with_fade_timeout(mut self, timeout: Duration) -> Self {
        self.fade_timeout = timeout;
        self
    }

    /// Runs the stop, remove, and network phases in order.
    pub async fn clean(&self, filter: &LabelFilter) -> CleanupReport {
        let stop = self.stop_running_containers(filter).await;
        let remove = self.remove_containers(filter).await;
        let networks = self.remove_networks(filter).await;
        let report = CleanupReport {
            stop,
            remove,
            networks,
        };
        tracing::info!(
            stopped = stop.succeeded(),
            removed = remove.succeeded(),
            networks = networks.succeeded(),
            clean = report.is_clean(),
            "cleanup finished"
        );
        report
    }

    /// Stops every running container matching `filter` and waits for each
    /// to fade away.
    pub async fn stop_running_containers(&self, filter: &LabelFilter) -> PhaseReport {
        let phase = Phase::StopContainers;
        let running = filter.clone().with_status(ContainerStatus::Running);
        let containers = match self.engine.list_containers(&running, &self.calls).await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::warn!(%phase, error = %e, "error finding running containers");
                return PhaseReport::skipped(phase);
            }
        };

        let mut tasks = JoinSet::new();
        for container in &containers {
            let cleaner = self.clone();
            let id = container.id.clone();
            let _ = tasks.spawn(async move { cleaner.shut_down(&id).await });
        }
        let failed = join_phase(tasks, phase).await;
        PhaseReport {
            phase,
            matched: containers.len(),
            failed,
            aborted: false,
        }
    }

    /// Force-removes every container matching `filter`, with its volumes.
    pub async fn remove_containers(&self, filter: &LabelFilter) -> PhaseReport {
        let phase = Phase::RemoveContainers;
        let containers = match self.engine.list_containers(filter, &self.calls).await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::warn!(%phase, error = %e, "error finding containers");
                return PhaseReport::skipped(phase);
            }
        };

        let mut tasks = JoinSet::new();
        for container in &containers {
            let cleaner = self.clone();
            let id = container.id.clone();
            let _ = tasks.spawn(async move { cleaner.remove(&id).await });
        }
        let failed = join_phase(tasks, phase).await;
        PhaseReport {
            phase,
            matched: containers.len(),
            failed,
            aborted: false,
        }
    }

    /// Removes every network matching `filter`, one after another.
    ///
    /// A listing failure skips the phase.
    pub async fn remove_networks(&self, filter: &LabelFilter) -> PhaseReport {
        match self.try_remove_networks(filter).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(phase = %Phase::RemoveNetworks, error = %e, "error finding networks");
                PhaseReport::skipped(Phase::RemoveNetworks)
            }
        }
    }

    /// Removes every network matching `filter`, reporting a listing failure
    /// to the caller.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the networks cannot be listed. Failures
    /// to remove single networks are logged and counted instead.
    pub async fn try_remove_networks(&self, filter: &LabelFilter) -> EngineResult<PhaseReport> {
        self.remove_networks_where(filter, |_| true).await
    }

    /// Removes the networks matching `filter` that are named `name`.
    ///
    /// Used before creating a network, to reclaim one left behind by an
    /// earlier run under the same name.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the networks cannot be listed.
    pub async fn reclaim_network_name(
        &self,
        filter: &LabelFilter,
        name: &str,
    ) -> EngineResult<PhaseReport> {
        self.remove_networks_where(filter, |network| network.name == name)
            .await
    }

    async fn remove_networks_where(
        &self,
        filter: &LabelFilter,
        selected: impl Fn(&NetworkSummary) -> bool,
    ) -> EngineResult<PhaseReport> {
        let networks: Vec<NetworkSummary> = self
            .engine
            .list_networks(filter, &self.calls)
            .await?
            .into_iter()
            .filter(|network| selected(network))
            .collect();
        let mut failed = 0;
        for network in &networks {
            match self.engine.remove_network(&network.id, &self.calls).await {
                Ok(()) => tracing::debug!(network = %network.name, "network removed"),
                Err(e) => {
                    tracing::warn!(network = %network.name, error = %e, "could not remove network");
                    failed += 1;
                }
            }
        }
        Ok(PhaseReport {
            phase: Phase::RemoveNetworks,
            matched: networks.len(),
            failed,
            aborted: false,
        })
    }

    async fn shut_down(&self, id: &str) -> bool {
        match self.engine.stop_container(id, self.stop_timeout, &self.calls).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return true,
            Err(e) => {
                tracing::warn!(container = id, error = %e, "could not stop container");
                return false;
            }
        }
        let deadline = Deadline::after(&self.session, self.fade_timeout);
        let faded = self
            .waiter
            .wait(&WaitCondition::FADED_AWAY, id, &deadline)
            .await;
        if !faded && self.session.is_cancelled() {
            // The engine accepted the stop; only the observation was cut short.
            tracing::debug!(container = id, "stopped, fade-away unconfirmed after cancellation");
            return true;
        }
        faded
    }

    async fn remove(&self, id: &str) -> bool {
        match self
            .engine
            .remove_container(id, RemoveOptions::FORCE_WITH_VOLUMES, &self.calls)
            .await
        {
            Ok(()) => {
                tracing::debug!(container = id, "container removed");
                true
            }
            // Auto-removed containers may vanish on their own after stopping.
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                tracing::warn!(container = id, error = %e, "could not remove container");
                false
            }
        }
    }
}

/// Waits for every task of a phase and returns how many failed.
async fn join_phase(mut tasks: JoinSet<bool>, phase: Phase) -> usize {
    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(true) => {}
            Ok(false) => failed += 1,
            Err(e) => {
                tracing::warn!(%phase, error = %e, "cleanup task did not complete");
                failed += 1;
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use shipyard_common::labels::session_labels;
    use shipyard_common::types::SessionId;
    use shipyard_engine::memory::{MemoryEngine, Operation};

    use super::*;

    fn cleaner(engine: &MemoryEngine) -> Cleaner {
        let engine: Arc<dyn EngineClient> = Arc::new(engine.clone());
        let waiter = Waiter::new(Arc::clone(&engine), Duration::from_millis(10));
        Cleaner::new(engine, waiter, CancellationToken::new())
    }

    fn labels(session: &str) -> HashMap<String, String> {
        session_labels(&SessionId::new(session))
    }

    #[tokio::test]
    async fn stop_phase_only_touches_running_matches() {
        let engine = MemoryEngine::new();
        let running = engine.add_container("a", labels("s1"), true);
        let _exited = engine.add_container("b", labels("s1"), false);

        let report = cleaner(&engine)
            .stop_running_containers(&LabelFilter::session(&SessionId::new("s1")))
            .await;

        assert_eq!(report.matched, 1);
        assert!(report.is_clean());
        assert_eq!(engine.completed(Operation::StopContainer), vec![running.clone()]);
        assert!(!engine.is_running(&running));
    }

    #[tokio::test]
    async fn one_failing_stop_does_not_abort_siblings() {
        let engine = MemoryEngine::new();
        let bad = engine.add_container("a", labels("s1"), true);
        let good = engine.add_container("b", labels("s1"), true);
        engine.fail_for(Operation::StopContainer, &bad);

        let report = cleaner(&engine)
            .stop_running_containers(&LabelFilter::domain())
            .await;

        assert_eq!(report.matched, 2);
        assert_eq!(report.failed, 1);
        assert!(!engine.is_running(&good));
        assert!(engine.is_running(&bad));
    }

    #[tokio::test]
    async fn listing_failure_skips_only_that_phase() {
        let engine = MemoryEngine::new();
        let id = engine.add_container("a", labels("s1"), true);
        let net = engine.add_network("n", labels("s1"));
        engine.fail(Operation::ListContainers);

        let report = cleaner(&engine).clean(&LabelFilter::domain()).await;

        assert!(report.stop.aborted);
        assert!(report.remove.aborted);
        assert!(report.networks.is_clean());
        assert!(engine.has_container(&id));
        assert!(!engine.has_network(&net));
    }

    #[tokio::test]
    async fn remove_phase_takes_any_status() {
        let engine = MemoryEngine::new();
        let a = engine.add_container("a", labels("s1"), true);
        let b = engine.add_container("b", labels("s1"), false);

        let report = cleaner(&engine).remove_containers(&LabelFilter::domain()).await;

        assert_eq!(report.matched, 2);
        assert!(!engine.has_container(&a));
        assert!(!engine.has_container(&b));
    }

    #[tokio::test]
    async fn network_sweep_without_matches_is_noop() {
        let engine = MemoryEngine::new();
        let report = cleaner(&engine).remove_networks(&LabelFilter::domain()).await;
        assert_eq!(report.matched, 0);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn try_remove_networks_reports_listing_failure() {
        let engine = MemoryEngine::new();
        engine.fail(Operation::ListNetworks);
        let result = cleaner(&engine).try_remove_networks(&LabelFilter::domain()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn failing_network_removal_is_counted() {
        let engine = MemoryEngine::new();
        let bad = engine.add_network("bad", labels("s1"));
        let good = engine.add_network("good", labels("s1"));
        engine.fail_for(Operation::RemoveNetwork, &bad);

        let report = cleaner(&engine).remove_networks(&LabelFilter::domain()).await;

        assert_eq!(report.failed, 1);
        assert!(engine.has_network(&bad));
        assert!(!engine.has_network(&good));
    }

    #[tokio::test]
    async fn name_reclaim_spares_other_names() {
        let engine = MemoryEngine::new();
        let stale = engine.add_network("backend", labels("old"));
        let other = engine.add_network("frontend", labels("old"));

        let report = cleaner(&engine)
            .reclaim_network_name(&LabelFilter::domain(), "backend")
            .await
            .expect("listing works");

        assert_eq!(report.matched, 1);
        assert!(!engine.has_network(&stale));
        assert!(engine.has_network(&other));
    }

    #[tokio::test]
    async fn cancelled_session_still_reclaims() {
        let engine = MemoryEngine::new();
        let id = engine.add_container("a", labels("s1"), true);
        let session = CancellationToken::new();
        session.cancel();
        let shared: Arc<dyn EngineClient> = Arc::new(engine.clone());
        let waiter = Waiter::new(Arc::clone(&shared), Duration::ZERO);

        let report = Cleaner::new(shared, waiter, session)
            .clean(&LabelFilter::domain())
            .await;

        assert_eq!(report.remove.succeeded(), 1);
        assert!(!engine.has_container(&id));
    }

    #[tokio::test]
    async fn accepted_stop_on_cancelled_session_is_not_a_failure() {
        let engine = MemoryEngine::new();
        let _a = engine.add_container("a", labels("s1"), true);
        let _b = engine.add_container("b", labels("s1"), true);
        let session = CancellationToken::new();
        session.cancel();
        let shared: Arc<dyn EngineClient> = Arc::new(engine.clone());
        let waiter = Waiter::new(Arc::clone(&shared), Duration::from_millis(10));

        let report = Cleaner::new(shared, waiter, session)
            .clean(&LabelFilter::domain())
            .await;

        assert_eq!(report.stop.matched, 2);
        assert!(report.is_clean(), "{report:?}");
    }

    #[tokio::test]
    async fn rejected_stop_on_cancelled_session_still_fails() {
        let engine = MemoryEngine::new();
        let id = engine.add_container("a", labels("s1"), true);
        engine.fail_for(Operation::StopContainer, &id);
        let session = CancellationToken::new();
        session.cancel();
        let shared: Arc<dyn EngineClient> = Arc::new(engine.clone());
        let waiter = Waiter::new(Arc::clone(&shared), Duration::from_millis(10));

        let report = Cleaner::new(shared, waiter, session)
            .stop_running_containers(&LabelFilter::domain())
            .await;

        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn unbounded_fade_timeout_stops_cleanly() {
        let engine = MemoryEngine::new();
        let id = engine.add_container("a", labels("s1"), true);

        let report = cleaner(&engine)
            .with_fade_timeout(Duration::MAX)
            .stop_running_containers(&LabelFilter::domain())
            .await;

        assert!(report.is_clean(), "{report:?}");
        assert!(!engine.is_running(&id));
    }
}
