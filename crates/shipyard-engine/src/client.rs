//! The engine client contract.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use shipyard_common::error::{EngineError, EngineResult};
use shipyard_common::labels::LabelFilter;
use tokio_util::sync::CancellationToken;

use crate::spec::{ContainerSpec, NetworkSpec};

/// A container as returned by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Engine id.
    pub id: String,
    /// Container name without the leading slash.
    pub name: String,
    /// Labels on the container.
    pub labels: HashMap<String, String>,
}

/// A network as returned by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    /// Engine id.
    pub id: String,
    /// Network name.
    pub name: String,
    /// Labels on the network.
    pub labels: HashMap<String, String>,
}

/// The part of an inspect result Shipyard reasons about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectSnapshot {
    /// Engine id.
    pub id: String,
    /// Container name without the leading slash.
    pub name: String,
    /// Whether the main process is running.
    pub running: bool,
    /// Exit code of the last run.
    pub exit_code: i64,
    /// Health status; `None` when no health check is configured.
    pub health: Option<String>,
    /// Full inspect document as reported by the engine.
    pub detail: serde_json::Value,
}

/// Options of a container removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill the container first if it is running.
    pub force: bool,
    /// Remove anonymous volumes along with the container.
    pub volumes: bool,
}

impl RemoveOptions {
    /// Forced removal including volumes, as used by cleanup.
    pub const FORCE_WITH_VOLUMES: Self = Self {
        force: true,
        volumes: true,
    };
}

/// Origin of a log chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// A demultiplexed piece of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    /// Stream the bytes were written to.
    pub source: LogSource,
    /// Raw bytes.
    pub bytes: Vec<u8>,
}

/// Stream of container output.
pub type LogStream = Pin<Box<dyn Stream<Item = EngineResult<LogChunk>> + Send>>;

/// Binds a log stream to `cancel`.
///
/// Once the token fires the stream yields a single
/// [`EngineError::Cancelled`] and ends.
pub fn cancellable_logs<S>(stream: S, cancel: &CancellationToken) -> LogStream
where
    S: Stream<Item = EngineResult<LogChunk>> + Send + 'static,
{
    let state = (Box::pin(stream), cancel.clone(), false);
    Box::pin(futures::stream::unfold(
        state,
        |(mut stream, cancel, ended)| async move {
            if ended {
                return None;
            }
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                item = stream.next() => Some(item),
            };
            match next {
                None => Some((Err(EngineError::Cancelled), (stream, cancel, true))),
                Some(item) => item.map(|item| (item, (stream, cancel, false))),
            }
        },
    ))
}

/// Operations Shipyard needs from a container engine.
///
/// Implementations must be safe to call from many tasks at once; callers
/// share one client through an `Arc` without further locking. Every call
/// takes a cancellation token and should give up promptly once it fires.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Verifies that the engine is reachable.
    async fn ping(&self, cancel: &CancellationToken) -> EngineResult<()>;

    /// Lists containers, stopped ones included, matching `filter`.
    async fn list_containers(
        &self,
        filter: &LabelFilter,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<ContainerSummary>>;

    /// Lists networks matching `filter`.
    async fn list_networks(
        &self,
        filter: &LabelFilter,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<NetworkSummary>>;

    /// Creates a container and returns its id.
    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> EngineResult<String>;

    /// Starts a created container.
    async fn start_container(&self, id: &str, cancel: &CancellationToken) -> EngineResult<()>;

    /// Stops a container, killing it after `timeout`.
    async fn stop_container(
        &self,
        id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> EngineResult<()>;

    /// Sends `signal` to a container.
    async fn kill_container(
        &self,
        id: &str,
        signal: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<()>;

    /// Removes a container.
    async fn remove_container(
        &self,
        id: &str,
        options: RemoveOptions,
        cancel: &CancellationToken,
    ) -> EngineResult<()>;

    /// Inspects a container.
    async fn inspect_container(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<InspectSnapshot>;

    /// Streams stdout and stderr of a container, following new output when
    /// `follow` is set. The stream ends with [`EngineError::Cancelled`] once
    /// `cancel` fires.
    fn container_logs(&self, id: &str, follow: bool, cancel: &CancellationToken) -> LogStream;

    /// Creates a network and returns its id.
    async fn create_network(
        &self,
        spec: &NetworkSpec,
        cancel: &CancellationToken,
    ) -> EngineResult<String>;

    /// Removes a network.
    async fn remove_network(&self, id: &str, cancel: &CancellationToken) -> EngineResult<()>;
}
