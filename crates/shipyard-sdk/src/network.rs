//! Network creation.

use shipyard_common::error::{Result, ShipyardError};
use shipyard_common::labels::LabelFilter;
use shipyard_engine::spec::{IpamPool, NetworkSpec};

use crate::session::Session;

/// A network created by a [`NetworkBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    id: String,
    name: String,
}

impl Network {
    /// Returns the engine id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the network name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builder for a session-labeled bridge network.
#[derive(Debug)]
pub struct NetworkBuilder {
    session: Session,
    spec: NetworkSpec,
}

impl NetworkBuilder {
    pub(crate) fn new(session: Session, name: impl Into<String>) -> Self {
        let spec = NetworkSpec {
            name: name.into(),
            driver: session.config().network_driver.clone(),
            attachable: true,
            check_duplicate: true,
            ipam: Vec::new(),
            labels: session.labels(),
        };
        Self { session, spec }
    }

    /// Pins the network to `subnet`, allocating container addresses from
    /// `ip_range`.
    #[must_use]
    pub fn subnet(mut self, subnet: impl Into<String>, ip_range: impl Into<String>) -> Self {
        self.spec.ipam.push(IpamPool {
            subnet: subnet.into(),
            ip_range: ip_range.into(),
        });
        self
    }

    /// Returns the spec the network will be created from.
    #[must_use]
    pub const fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    /// Creates the network.
    ///
    /// A labeled network of the same name left behind by an earlier run is
    /// removed first.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::Setup`] if existing networks cannot be
    /// listed, [`ShipyardError::SessionClosed`] after cleanup, and an engine
    /// error if creation fails.
    pub async fn create(self) -> Result<Network> {
        self.session.ensure_open()?;
        let _ = self
            .session
            .cleaner()
            .reclaim_network_name(&LabelFilter::domain(), &self.spec.name)
            .await
            .map_err(|source| ShipyardError::Setup {
                operation: "list networks",
                source,
            })?;

        let id = self
            .session
            .engine()
            .create_network(&self.spec, self.session.cancellation_token())
            .await
            .map_err(|e| ShipyardError::engine("create network", e))?;
        self.session.mark_active();
        tracing::info!(network = %self.spec.name, session = %self.session.id(), "network created");
        Ok(Network {
            id,
            name: self.spec.name,
        })
    }
}
