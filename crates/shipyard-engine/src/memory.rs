//! In-process simulated engine.
//!
//! [`MemoryEngine`] keeps containers and networks in memory and behaves like
//! a small, obedient Docker daemon: labels are filtered, running containers
//! refuse unforced removal, networks with running members refuse removal.
//! Latency and failures can be injected, and every call is journaled so
//! tests can assert on the order in which the engine observed them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use shipyard_common::error::{EngineError, EngineResult};
use shipyard_common::labels::LabelFilter;
use tokio_util::sync::CancellationToken;

use crate::client::{
    ContainerSummary, EngineClient, InspectSnapshot, LogChunk, LogSource, LogStream,
    NetworkSummary, RemoveOptions, cancellable_logs,
};
use crate::spec::{ContainerSpec, NetworkSpec};

/// Engine operations, as recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `ping`
    Ping,
    /// `list_containers`
    ListContainers,
    /// `list_networks`
    ListNetworks,
    /// `create_container`
    CreateContainer,
    /// `start_container`
    StartContainer,
    /// `stop_container`
    StopContainer,
    /// `kill_container`
    KillContainer,
    /// `remove_container`
    RemoveContainer,
    /// `inspect_container`
    InspectContainer,
    /// `create_network`
    CreateNetwork,
    /// `remove_network`
    RemoveNetwork,
}

/// When the engine saw a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// The call arrived.
    Received,
    /// The call finished successfully.
    Completed,
}

/// A journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation called.
    pub operation: Operation,
    /// Container id, network id, or name the call addressed.
    pub target: String,
    /// Whether the entry marks arrival or completion.
    pub event: CallEvent,
}

#[derive(Debug, Clone)]
struct MemContainer {
    name: String,
    labels: HashMap<String, String>,
    spec: ContainerSpec,
    running: bool,
    exit_code: i64,
    health: Option<String>,
    logs: Vec<LogChunk>,
}

#[derive(Debug, Clone)]
struct MemNetwork {
    name: String,
    labels: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<String, MemContainer>,
    networks: BTreeMap<String, MemNetwork>,
    failures: HashSet<(Operation, Option<String>)>,
    journal: Vec<Call>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    latency: Mutex<Duration>,
}

/// Simulated container engine.
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<Inner>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn conflict(message: impl Into<String>) -> EngineError {
    EngineError::Api {
        status: 409,
        message: message.into(),
    }
}

fn missing(kind: &'static str, id: &str) -> EngineError {
    EngineError::NotFound {
        kind,
        id: id.to_string(),
    }
}

impl MemoryEngine {
    /// Creates an empty engine without latency.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty engine in which every call takes `latency`.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        let engine = Self::new();
        engine.set_latency(latency);
        engine
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the latency of every subsequent call.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    fn latency(&self) -> Duration {
        *self.inner.latency.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every call of `operation` fail.
    pub fn fail(&self, operation: Operation) {
        let _ = self.state().failures.insert((operation, None));
    }

    /// Makes calls of `operation` addressing `target` fail.
    pub fn fail_for(&self, operation: Operation, target: &str) {
        let _ = self
            .state()
            .failures
            .insert((operation, Some(target.to_string())));
    }

    /// Seeds a container directly, bypassing the journal. Returns its id.
    pub fn add_container(
        &self,
        name: &str,
        labels: HashMap<String, String>,
        running: bool,
    ) -> String {
        let id = new_id();
        let container = MemContainer {
            name: name.to_string(),
            labels,
            spec: ContainerSpec::default(),
            running,
            exit_code: 0,
            health: None,
            logs: Vec::new(),
        };
        let _ = self.state().containers.insert(id.clone(), container);
        id
    }

    /// Seeds a network directly, bypassing the journal. Returns its id.
    pub fn add_network(&self, name: &str, labels: HashMap<String, String>) -> String {
        let id = new_id();
        let network = MemNetwork {
            name: name.to_string(),
            labels,
        };
        let _ = self.state().networks.insert(id.clone(), network);
        id
    }

    /// Sets the health status reported for a container.
    pub fn set_health(&self, id: &str, health: Option<&str>) {
        if let Some(c) = self.state().containers.get_mut(id) {
            c.health = health.map(ToString::to_string);
        }
    }

    /// Sets the run state of a container.
    pub fn set_running(&self, id: &str, running: bool) {
        if let Some(c) = self.state().containers.get_mut(id) {
            c.running = running;
        }
    }

    /// Appends output to a container's log.
    pub fn push_log(&self, id: &str, source: LogSource, text: &str) {
        self.push_log_bytes(id, source, text.as_bytes());
    }

    /// Appends raw output to a container's log, one chunk per call.
    pub fn push_log_bytes(&self, id: &str, source: LogSource, bytes: &[u8]) {
        if let Some(c) = self.state().containers.get_mut(id) {
            c.logs.push(LogChunk {
                source,
                bytes: bytes.to_vec(),
            });
        }
    }

    /// Returns whether a container exists.
    #[must_use]
    pub fn has_container(&self, id: &str) -> bool {
        self.state().containers.contains_key(id)
    }

    /// Returns whether a container exists and is running.
    #[must_use]
    pub fn is_running(&self, id: &str) -> bool {
        self.state().containers.get(id).is_some_and(|c| c.running)
    }

    /// Returns whether a network exists.
    #[must_use]
    pub fn has_network(&self, id: &str) -> bool {
        self.state().networks.contains_key(id)
    }

    /// Returns the ids of all containers.
    #[must_use]
    pub fn container_ids(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    /// Returns the ids of all networks.
    #[must_use]
    pub fn network_ids(&self) -> Vec<String> {
        self.state().networks.keys().cloned().collect()
    }

    /// Returns the spec a container was created from.
    #[must_use]
    pub fn container_spec(&self, id: &str) -> Option<ContainerSpec> {
        self.state().containers.get(id).map(|c| c.spec.clone())
    }

    /// Returns a copy of the call journal.
    #[must_use]
    pub fn journal(&self) -> Vec<Call> {
        self.state().journal.clone()
    }

    /// Returns the targets of successfully completed calls of `operation`.
    #[must_use]
    pub fn completed(&self, operation: Operation) -> Vec<String> {
        self.state()
            .journal
            .iter()
            .filter(|c| c.operation == operation && c.event == CallEvent::Completed)
            .map(|c| c.target.clone())
            .collect()
    }

    /// Journals the arrival of a call, simulates latency, and applies
    /// injected failures.
    async fn enter(
        &self,
        operation: Operation,
        target: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        self.record(operation, target, CallEvent::Received);
        let latency = self.latency();
        if latency.is_zero() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
        } else {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                () = tokio::time::sleep(latency) => {}
            }
        }
        let state = self.state();
        let target = target.to_string();
        if state.failures.contains(&(operation, None))
            || state.failures.contains(&(operation, Some(target.clone())))
        {
            return Err(EngineError::Api {
                status: 500,
                message: format!("injected {operation:?} failure for {target}"),
            });
        }
        Ok(())
    }

    fn record(&self, operation: Operation, target: &str, event: CallEvent) {
        self.state().journal.push(Call {
            operation,
            target: target.to_string(),
            event,
        });
    }

    fn finish<T>(&self, operation: Operation, target: &str, result: EngineResult<T>) -> EngineResult<T> {
        if result.is_ok() {
            self.record(operation, target, CallEvent::Completed);
        }
        result
    }
}

#[async_trait]
impl EngineClient for MemoryEngine {
    async fn ping(&self, cancel: &CancellationToken) -> EngineResult<()> {
        self.enter(Operation::Ping, "engine", cancel).await?;
        self.finish(Operation::Ping, "engine", Ok(()))
    }

    async fn list_containers(
        &self,
        filter: &LabelFilter,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<ContainerSummary>> {
        self.enter(Operation::ListContainers, "*", cancel).await?;
        let found = self
            .state()
            .containers
            .iter()
            .filter(|(_, c)| filter.matches(&c.labels, c.running))
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                name: c.name.clone(),
                labels: c.labels.clone(),
            })
            .collect();
        self.finish(Operation::ListContainers, "*", Ok(found))
    }

    async fn list_networks(
        &self,
        filter: &LabelFilter,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<NetworkSummary>> {
        self.enter(Operation::ListNetworks, "*", cancel).await?;
        let found = self
            .state()
            .networks
            .iter()
            .filter(|(_, n)| filter.matches(&n.labels, false))
            .map(|(id, n)| NetworkSummary {
                id: id.clone(),
                name: n.name.clone(),
                labels: n.labels.clone(),
            })
            .collect();
        self.finish(Operation::ListNetworks, "*", Ok(found))
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> EngineResult<String> {
        self.enter(Operation::CreateContainer, name, cancel).await?;
        let result = {
            let mut state = self.state();
            if !name.is_empty() && state.containers.values().any(|c| c.name == name) {
                Err(conflict(format!("container name {name} is already in use")))
            } else {
                let id = new_id();
                let container = MemContainer {
                    name: name.to_string(),
                    labels: spec.labels.clone(),
                    spec: spec.clone(),
                    running: false,
                    exit_code: 0,
                    health: None,
                    logs: Vec::new(),
                };
                let _ = state.containers.insert(id.clone(), container);
                Ok(id)
            }
        };
        self.finish(Operation::CreateContainer, name, result)
    }

    async fn start_container(&self, id: &str, cancel: &CancellationToken) -> EngineResult<()> {
        self.enter(Operation::StartContainer, id, cancel).await?;
        let result = match self.state().containers.get_mut(id) {
            Some(c) => {
                c.running = true;
                c.exit_code = 0;
                if c.spec.health_check.is_some() {
                    c.health = Some("starting".to_string());
                }
                Ok(())
            }
            None => Err(missing("container", id)),
        };
        self.finish(Operation::StartContainer, id, result)
    }

    async fn stop_container(
        &self,
        id: &str,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        self.enter(Operation::StopContainer, id, cancel).await?;
        let result = match self.state().containers.get_mut(id) {
            Some(c) => {
                c.running = false;
                Ok(())
            }
            None => Err(missing("container", id)),
        };
        self.finish(Operation::StopContainer, id, result)
    }

    async fn kill_container(
        &self,
        id: &str,
        _signal: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        self.enter(Operation::KillContainer, id, cancel).await?;
        let result = match self.state().containers.get_mut(id) {
            Some(c) if c.running => {
                c.running = false;
                c.exit_code = 137;
                Ok(())
            }
            Some(_) => Err(conflict(format!("container {id} is not running"))),
            None => Err(missing("container", id)),
        };
        self.finish(Operation::KillContainer, id, result)
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveOptions,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        self.enter(Operation::RemoveContainer, id, cancel).await?;
        let result = {
            let mut state = self.state();
            match state.containers.get(id) {
                None => Err(missing("container", id)),
                Some(c) if c.running && !options.force => Err(conflict(format!(
                    "cannot remove running container {id}, stop it first"
                ))),
                Some(_) => {
                    let _ = state.containers.remove(id);
                    Ok(())
                }
            }
        };
        self.finish(Operation::RemoveContainer, id, result)
    }

    async fn inspect_container(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<InspectSnapshot> {
        self.enter(Operation::InspectContainer, id, cancel).await?;
        let result = self
            .state()
            .containers
            .get(id)
            .map(|c| InspectSnapshot {
                id: id.to_string(),
                name: c.name.clone(),
                running: c.running,
                exit_code: c.exit_code,
                health: c.health.clone(),
                detail: serde_json::json!({
                    "Id": id,
                    "Name": format!("/{}", c.name),
                    "State": {
                        "Running": c.running,
                        "ExitCode": c.exit_code,
                        "Health": c.health.as_ref().map(|h| serde_json::json!({ "Status": h })),
                    },
                    "Config": { "Image": c.spec.image, "Labels": c.labels },
                }),
            })
            .ok_or_else(|| missing("container", id));
        self.finish(Operation::InspectContainer, id, result)
    }

    fn container_logs(&self, id: &str, _follow: bool, cancel: &CancellationToken) -> LogStream {
        let items: Vec<EngineResult<LogChunk>> = match self.state().containers.get(id) {
            Some(c) => c.logs.iter().cloned().map(Ok).collect(),
            None => vec![Err(missing("container", id))],
        };
        cancellable_logs(futures::stream::iter(items), cancel)
    }

    async fn create_network(
        &self,
        spec: &NetworkSpec,
        cancel: &CancellationToken,
    ) -> EngineResult<String> {
        self.enter(Operation::CreateNetwork, &spec.name, cancel).await?;
        let result = {
            let mut state = self.state();
            if spec.check_duplicate && state.networks.values().any(|n| n.name == spec.name) {
                Err(conflict(format!("network with name {} already exists", spec.name)))
            } else {
                let id = new_id();
                let network = MemNetwork {
                    name: spec.name.clone(),
                    labels: spec.labels.clone(),
                };
                let _ = state.networks.insert(id.clone(), network);
                Ok(id)
            }
        };
        self.finish(Operation::CreateNetwork, &spec.name, result)
    }

    async fn remove_network(&self, id: &str, cancel: &CancellationToken) -> EngineResult<()> {
        self.enter(Operation::RemoveNetwork, id, cancel).await?;
        let result = {
            let mut state = self.state();
            match state.networks.get(id) {
                None => Err(missing("network", id)),
                Some(n) => {
                    let in_use = state.containers.values().any(|c| {
                        c.running && c.spec.network_mode.as_deref() == Some(n.name.as_str())
                    });
                    if in_use {
                        Err(EngineError::Api {
                            status: 403,
                            message: format!("network {} has active endpoints", n.name),
                        })
                    } else {
                        let _ = state.networks.remove(id);
                        Ok(())
                    }
                }
            }
        };
        self.finish(Operation::RemoveNetwork, id, result)
    }
}
