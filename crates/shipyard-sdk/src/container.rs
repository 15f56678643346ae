//! Handle to a created container.

use std::fmt;
use std::sync::Arc;

use shipyard_common::error::{Result, ShipyardError};
use shipyard_engine::EngineClient;
use shipyard_engine::client::InspectSnapshot;
use shipyard_runtime::dump;
use tokio_util::sync::CancellationToken;

/// A container created by a [`ContainerBuilder`](crate::builder::ContainerBuilder).
///
/// Clones refer to the same engine container.
#[derive(Clone)]
pub struct Container {
    id: String,
    name: String,
    engine: Arc<dyn EngineClient>,
    token: CancellationToken,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Container {
    pub(crate) fn new(
        id: String,
        name: String,
        engine: Arc<dyn EngineClient>,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            name,
            engine,
            token,
        }
    }

    /// Returns the engine id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the container name, or its id when it was created unnamed.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses to start it.
    pub async fn start(&self) -> Result<()> {
        self.engine
            .start_container(&self.id, &self.token)
            .await
            .map_err(|e| ShipyardError::engine("start container", e))?;
        tracing::info!(container = %self.name, "container started");
        Ok(())
    }

    /// Inspects the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be inspected.
    pub async fn inspect(&self) -> Result<InspectSnapshot> {
        self.engine
            .inspect_container(&self.id, &self.token)
            .await
            .map_err(|e| ShipyardError::engine("inspect container", e))
    }

    /// Returns the exit code of the container's last run.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::ContainerRunning`] while the container is
    /// still running, or an error if it cannot be inspected.
    pub async fn exit_code(&self) -> Result<i64> {
        let snapshot = self.inspect().await?;
        if snapshot.running {
            return Err(ShipyardError::ContainerRunning {
                container: self.name.clone(),
            });
        }
        Ok(snapshot.exit_code)
    }

    /// Reads everything the container wrote so far.
    ///
    /// # Errors
    ///
    /// Returns [`ShipyardError::Cancelled`] after [`cancel`](Self::cancel)
    /// and an error if the log stream cannot be read.
    pub async fn logs(&self) -> Result<String> {
        dump::read_container_log(self.engine.as_ref(), &self.id, &self.token).await
    }

    /// Cancels in-flight and future engine calls made through this handle.
    ///
    /// Other containers of the session are unaffected.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) const fn token(&self) -> &CancellationToken {
        &self.token
    }
}
