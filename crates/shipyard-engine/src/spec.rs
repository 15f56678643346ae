//! Engine-neutral descriptions of resources to create.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Health check run by the engine inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Test command in engine form, e.g. `["CMD-SHELL", "pg_isready"]`.
    pub test: Vec<String>,
    /// Time between two checks.
    pub interval: Duration,
    /// Consecutive failures needed to report unhealthy.
    pub retries: i64,
}

/// Per-network settings of a container endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Engine id of the network.
    pub network_id: Option<String>,
    /// Links to other containers, as `name:alias`.
    pub links: Vec<String>,
    /// Fixed IPv4 address inside the network.
    pub ipv4_address: Option<String>,
}

/// Host side of a published container port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    /// Host interface to bind; all interfaces when absent.
    pub host_ip: Option<String>,
    /// Host port; engine-assigned when absent.
    pub host_port: Option<String>,
}

/// Everything the engine needs to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Command overriding the image's default.
    pub cmd: Vec<String>,
    /// Environment entries as `NAME=value`.
    pub env: Vec<String>,
    /// Labels attached to the container.
    pub labels: HashMap<String, String>,
    /// Bind mounts as `host:container`.
    pub binds: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// DNS servers.
    pub dns: Vec<String>,
    /// Whether the engine removes the container when it exits.
    pub auto_remove: bool,
    /// Health check, if any.
    pub health_check: Option<HealthCheck>,
    /// Network mode, usually the name of the attached network.
    pub network_mode: Option<String>,
    /// Endpoint settings keyed by network name.
    pub endpoints: BTreeMap<String, EndpointSpec>,
    /// Published ports keyed by `port/proto`.
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
}

/// IP address management entry of a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpamPool {
    /// Subnet in CIDR form.
    pub subnet: String,
    /// Range of the subnet containers are allocated from.
    pub ip_range: String,
}

/// Everything the engine needs to create a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Network name.
    pub name: String,
    /// Network driver.
    pub driver: String,
    /// Whether containers may attach after creation.
    pub attachable: bool,
    /// Whether the engine rejects a name already in use.
    pub check_duplicate: bool,
    /// Address pools; engine-chosen when empty.
    pub ipam: Vec<IpamPool>,
    /// Labels attached to the network.
    pub labels: HashMap<String, String>,
}
