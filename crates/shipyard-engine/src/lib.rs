//! # shipyard-engine
//!
//! The seam between Shipyard and the container engine.
//!
//! - [`EngineClient`](client::EngineClient): the operations Shipyard needs
//!   from an engine, every one fallible and bound to a cancellation token.
//! - [`DockerEngine`](docker::DockerEngine): implementation over the Docker
//!   API through `bollard`.
//! - [`MemoryEngine`](memory::MemoryEngine): an in-process simulated engine
//!   with injectable latency and failures.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod client;
pub mod docker;
pub mod memory;
pub mod spec;

pub use client::EngineClient;
