//! Fluent API for configuring and creating containers.

use std::time::Duration;

use shipyard_common::constants::{HEALTH_CHECK_INTERVAL_MS, HEALTH_CHECK_RETRIES};
use shipyard_common::error::{Result, ShipyardError};
use shipyard_engine::spec::{ContainerSpec, EndpointSpec, HealthCheck, PortBinding};

use crate::container::Container;
use crate::network::Network;
use crate::session::Session;

/// Builder for a session-labeled container.
///
/// Every setter consumes and returns the builder. Use [`fork`](Self::fork)
/// to branch a shared base configuration into several containers.
#[derive(Debug)]
pub struct ContainerBuilder {
    session: Session,
    spec: ContainerSpec,
    name: String,
    original_name: String,
}

impl ContainerBuilder {
    pub(crate) fn new(session: Session) -> Self {
        let spec = ContainerSpec {
            labels: session.labels(),
            ..ContainerSpec::default()
        };
        Self {
            session,
            spec,
            name: String::new(),
            original_name: String::new(),
        }
    }

    /// Returns an independent copy of this builder.
    ///
    /// Changes to the copy do not affect the original, and the other way
    /// round.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            session: self.session.clone(),
            spec: self.spec.clone(),
            name: self.name.clone(),
            original_name: self.original_name.clone(),
        }
    }

    /// Names the container `<name>-<session id>`.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.original_name = name.into();
        self.name = format!("{}-{}", self.original_name, self.session.id());
        self
    }

    /// Drops the session suffix from the container name.
    #[must_use]
    pub fn use_original_name(mut self) -> Self {
        self.name.clone_from(&self.original_name);
        self
    }

    /// Sets the image.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.spec.image = image.into();
        self
    }

    /// Sets the command, split on spaces.
    #[must_use]
    pub fn cmd(mut self, cmd: &str) -> Self {
        self.spec.cmd = cmd
            .split(' ')
            .filter(|part| !part.is_empty())
            .map(ToString::to_string)
            .collect();
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.spec.env.push(format!("{name}={value}"));
        self
    }

    /// Mounts a host directory into the container.
    #[must_use]
    pub fn mount(mut self, host_path: &str, container_path: &str) -> Self {
        self.spec.binds.push(format!("{host_path}:{container_path}"));
        self
    }

    /// Adds a shell health check, run every 200 ms with 20 retries.
    #[must_use]
    pub fn health_shell_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.spec.health_check = Some(HealthCheck {
            test: vec!["CMD-SHELL".to_string(), cmd.into()],
            interval: Duration::from_millis(HEALTH_CHECK_INTERVAL_MS),
            retries: HEALTH_CHECK_RETRIES,
        });
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.spec.working_dir = Some(dir.into());
        self
    }

    /// Adds a DNS server.
    #[must_use]
    pub fn dns(mut self, server: impl Into<String>) -> Self {
        self.spec.dns.push(server.into());
        self
    }

    /// Lets the engine remove the container once it exits.
    #[must_use]
    pub const fn auto_remove(mut self, enabled: bool) -> Self {
        self.spec.auto_remove = enabled;
        self
    }

    /// Attaches the container to `network`.
    #[must_use]
    pub fn connect(mut self, network: &Network) -> Self {
        self.spec.network_mode = Some(network.name().to_string());
        self.endpoint(network).network_id = Some(network.id().to_string());
        self
    }

    /// Pins the container's IPv4 address inside `network`.
    #[must_use]
    pub fn ip_address(mut self, address: impl Into<String>, network: &Network) -> Self {
        self.endpoint(network).ipv4_address = Some(address.into());
        self
    }

    /// Makes `container` reachable as `alias` inside `network`.
    #[must_use]
    pub fn link(mut self, container: &Container, alias: &str, network: &Network) -> Self {
        let link = format!("{}:{alias}", container.name());
        self.endpoint(network).links.push(link);
        self
    }

    /// Exposes a container port such as `8080/tcp` without publishing it.
    #[must_use]
    pub fn expose_port(mut self, port: impl Into<String>) -> Self {
        let _ = self.spec.port_bindings.entry(port.into()).or_default();
        self
    }

    /// Publishes a container port on `host_port` of all host interfaces.
    #[must_use]
    pub fn bind_port(mut self, port: impl Into<String>, host_port: impl Into<String>) -> Self {
        self.spec
            .port_bindings
            .entry(port.into())
            .or_default()
            .push(PortBinding {
                host_ip: None,
                host_port: Some(host_port.into()),
            });
        self
    }

    /// Returns the name the container will be created with.
    #[must_use]
    pub fn container_name(&self) -> &str {
        &self.name
    }

    /// Returns the accumulated spec.
    #[must_use]
    pub const fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    fn endpoint(&mut self, network: &Network) -> &mut EndpointSpec {
        self.spec
            .endpoints
            .entry(network.name().to_string())
            .or_default()
    }

    /// Creates the container without starting it.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::Config`] if no image is set,
    /// [`ShipyardError::SessionClosed`] after cleanup, and an engine error
    /// if creation fails.
    pub async fn build(self) -> Result<Container> {
        self.session.ensure_open()?;
        if self.spec.image.is_empty() {
            return Err(ShipyardError::Config {
                message: "container image is required".to_string(),
            });
        }

        let engine = self.session.engine();
        let id = engine
            .create_container(&self.name, &self.spec, self.session.cancellation_token())
            .await
            .map_err(|e| ShipyardError::engine("create container", e))?;
        self.session.mark_active();

        let name = if self.name.is_empty() {
            id.clone()
        } else {
            self.name
        };
        tracing::info!(container = %name, image = %self.spec.image, "container created");
        let token = self.session.cancellation_token().child_token();
        Ok(Container::new(id, name, engine, token))
    }
}
