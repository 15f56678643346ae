//! Docker implementation of [`EngineClient`] over `bollard`.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{
    ContainerInspectResponse, EndpointIpamConfig, EndpointSettings, HealthConfig, HostConfig,
    Ipam, IpamConfig, NetworkCreateResponse,
};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use futures::StreamExt;
use shipyard_common::error::{EngineError, EngineResult};
use shipyard_common::labels::LabelFilter;
use tokio_util::sync::CancellationToken;

use crate::client::{
    ContainerSummary, EngineClient, InspectSnapshot, LogChunk, LogSource, LogStream,
    NetworkSummary, RemoveOptions, cancellable_logs,
};
use crate::spec::{ContainerSpec, HealthCheck, NetworkSpec};

/// Engine client talking to a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects using the local defaults (`DOCKER_HOST` or the local socket).
    ///
    /// The connection is lazy; call [`EngineClient::ping`] to verify it.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be configured.
    pub fn connect_local() -> EngineResult<Self> {
        Docker::connect_with_local_defaults()
            .map(Self::from_client)
            .map_err(|e| map_error(e, "engine", "local"))
    }

    /// Wraps an already configured `bollard` client.
    #[must_use]
    pub const fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Runs an engine call, giving up as soon as `cancel` fires.
async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, DockerError>>,
    kind: &'static str,
    id: &str,
) -> EngineResult<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(EngineError::Cancelled),
        result = call => result.map_err(|e| map_error(e, kind, id)),
    }
}

fn map_error(err: DockerError, kind: &'static str, id: &str) -> EngineError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound {
            kind,
            id: id.to_string(),
        },
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api {
            status: status_code,
            message,
        },
        other => EngineError::Transport {
            message: other.to_string(),
        },
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

fn health_config(check: &HealthCheck) -> HealthConfig {
    HealthConfig {
        test: Some(check.test.clone()),
        interval: Some(i64::try_from(check.interval.as_nanos()).unwrap_or(i64::MAX)),
        retries: Some(check.retries),
        ..Default::default()
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let port_bindings: HashMap<String, Option<Vec<bollard::models::PortBinding>>> = spec
        .port_bindings
        .iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .iter()
                .map(|b| bollard::models::PortBinding {
                    host_ip: b.host_ip.clone(),
                    host_port: b.host_port.clone(),
                })
                .collect();
            (port.clone(), Some(bindings))
        })
        .collect();
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .port_bindings
        .keys()
        .map(|port| (port.clone(), HashMap::new()))
        .collect();

    let host_config = HostConfig {
        binds: non_empty(&spec.binds),
        network_mode: spec.network_mode.clone(),
        dns: non_empty(&spec.dns),
        auto_remove: Some(spec.auto_remove),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        ..Default::default()
    };

    let networking_config = (!spec.endpoints.is_empty()).then(|| NetworkingConfig {
        endpoints_config: spec
            .endpoints
            .iter()
            .map(|(network, endpoint)| {
                let settings = EndpointSettings {
                    network_id: endpoint.network_id.clone(),
                    links: non_empty(&endpoint.links),
                    ipam_config: endpoint.ipv4_address.as_ref().map(|ip| EndpointIpamConfig {
                        ipv4_address: Some(ip.clone()),
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                (network.clone(), settings)
            })
            .collect(),
    });

    Config {
        image: Some(spec.image.clone()),
        cmd: non_empty(&spec.cmd),
        env: non_empty(&spec.env),
        labels: Some(spec.labels.clone()),
        working_dir: spec.working_dir.clone(),
        healthcheck: spec.health_check.as_ref().map(health_config),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

fn snapshot(id: &str, response: &ContainerInspectResponse) -> InspectSnapshot {
    let state = response.state.as_ref();
    let health = state
        .and_then(|s| s.health.as_ref())
        .and_then(|h| h.status.as_ref())
        .map(ToString::to_string)
        .filter(|status| !status.is_empty());
    InspectSnapshot {
        id: response.id.clone().unwrap_or_else(|| id.to_string()),
        name: response
            .name
            .as_deref()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        running: state.and_then(|s| s.running).unwrap_or(false),
        exit_code: state.and_then(|s| s.exit_code).unwrap_or(-1),
        health,
        detail: serde_json::to_value(response).unwrap_or_default(),
    }
}

fn created_network_id(response: NetworkCreateResponse) -> EngineResult<String> {
    response
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EngineError::Transport {
            message: "network created without id".to_string(),
        })
}

fn log_chunk(item: Result<LogOutput, DockerError>, id: &str) -> Option<EngineResult<LogChunk>> {
    match item {
        Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => Some(Ok(LogChunk {
            source: LogSource::Stdout,
            bytes: message.to_vec(),
        })),
        Ok(LogOutput::StdErr { message }) => Some(Ok(LogChunk {
            source: LogSource::Stderr,
            bytes: message.to_vec(),
        })),
        Ok(LogOutput::StdIn { .. }) => None,
        Err(e) => Some(Err(map_error(e, "container", id))),
    }
}

#[async_trait]
impl EngineClient for DockerEngine {
    async fn ping(&self, cancel: &CancellationToken) -> EngineResult<()> {
        cancellable(cancel, self.docker.ping(), "engine", "ping")
            .await
            .map(|_| ())
    }

    async fn list_containers(
        &self,
        filter: &LabelFilter,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: filter.to_engine_filters(),
            ..Default::default()
        };
        let containers =
            cancellable(cancel, self.docker.list_containers(Some(options)), "container", "*")
                .await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_networks(
        &self,
        filter: &LabelFilter,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<NetworkSummary>> {
        let options = ListNetworksOptions::<String> {
            filters: filter.to_engine_filters(),
        };
        let networks =
            cancellable(cancel, self.docker.list_networks(Some(options)), "network", "*").await?;
        Ok(networks
            .into_iter()
            .map(|n| NetworkSummary {
                id: n.id.unwrap_or_default(),
                name: n.name.unwrap_or_default(),
                labels: n.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> EngineResult<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            ..Default::default()
        };
        let call = self
            .docker
            .create_container(Some(options), container_config(spec));
        let response = cancellable(cancel, call, "image", &spec.image).await?;
        tracing::debug!(id = %response.id, name, "container created");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str, cancel: &CancellationToken) -> EngineResult<()> {
        let call = self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>);
        cancellable(cancel, call, "container", id).await
    }

    async fn stop_container(
        &self,
        id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let options = StopContainerOptions {
            t: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        };
        match cancellable(cancel, self.docker.stop_container(id, Some(options)), "container", id)
            .await
        {
            // Already stopped.
            Err(EngineError::Api { status: 304, .. }) => Ok(()),
            other => other,
        }
    }

    async fn kill_container(
        &self,
        id: &str,
        signal: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let options = KillContainerOptions {
            signal: signal.to_string(),
        };
        cancellable(cancel, self.docker.kill_container(id, Some(options)), "container", id).await
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveOptions,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let options = RemoveContainerOptions {
            v: options.volumes,
            force: options.force,
            link: false,
        };
        cancellable(cancel, self.docker.remove_container(id, Some(options)), "container", id)
            .await
    }

    async fn inspect_container(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<InspectSnapshot> {
        let response =
            cancellable(cancel, self.docker.inspect_container(id, None), "container", id).await?;
        Ok(snapshot(id, &response))
    }

    fn container_logs(&self, id: &str, follow: bool, cancel: &CancellationToken) -> LogStream {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let owned_id = id.to_string();
        let stream = self
            .docker
            .logs(id, Some(options))
            .filter_map(move |item| futures::future::ready(log_chunk(item, &owned_id)));
        cancellable_logs(stream, cancel)
    }

    async fn create_network(
        &self,
        spec: &NetworkSpec,
        cancel: &CancellationToken,
    ) -> EngineResult<String> {
        let pools = spec
            .ipam
            .iter()
            .map(|pool| IpamConfig {
                subnet: Some(pool.subnet.clone()),
                ip_range: Some(pool.ip_range.clone()),
                ..Default::default()
            })
            .collect();
        let options = CreateNetworkOptions {
            name: spec.name.clone(),
            check_duplicate: spec.check_duplicate,
            driver: spec.driver.clone(),
            attachable: spec.attachable,
            ipam: Ipam {
                driver: Some("default".to_string()),
                config: Some(pools),
                ..Default::default()
            },
            labels: spec.labels.clone(),
            ..Default::default()
        };
        let response =
            cancellable(cancel, self.docker.create_network(options), "network", &spec.name)
                .await?;
        created_network_id(response)
    }

    async fn remove_network(&self, id: &str, cancel: &CancellationToken) -> EngineResult<()> {
        cancellable(cancel, self.docker.remove_network(id), "network", id).await
    }
}
