//! # shipyard-common
//!
//! Shared types, error definitions, configuration models, label
//! conventions, and constants used across the entire Shipyard workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the foundational primitives that all other
//! crates build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod labels;
pub mod types;
