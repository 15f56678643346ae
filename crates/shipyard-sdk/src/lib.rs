//! # shipyard-sdk
//!
//! Container-backed functional tests in Rust.
//!
//! Provides three main entry points:
//! - [`Session`]: owns every resource a test creates and cleans them up.
//! - [`ContainerBuilder`]: fluent API for configuring containers.
//! - [`NetworkBuilder`]: session-labeled bridge networks.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use shipyard_sdk::{Session, SessionConfig};
//!
//! # async fn run() -> shipyard_sdk::Result<()> {
//! let session = Session::connect(SessionConfig::default()).await?;
//! session
//!     .scope(|s| async move {
//!         let db = s
//!             .new_container_builder()
//!             .name("db")
//!             .image("postgres:16")
//!             .env("POSTGRES_PASSWORD", "secret")
//!             .health_shell_cmd("pg_isready")
//!             .build()
//!             .await?;
//!         s.start_containers(&[&db]).await?;
//!         s.wait_for_healthy(&db, Duration::from_secs(30)).await
//!     })
//!     .await
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod container;
pub mod network;
pub mod session;

pub use builder::ContainerBuilder;
pub use container::Container;
pub use network::{Network, NetworkBuilder};
pub use session::{ExitOutcome, Session};
pub use shipyard_common::config::SessionConfig;
pub use shipyard_common::error::{Result, ShipyardError};
pub use shipyard_runtime::CleanupReport;
