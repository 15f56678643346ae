//! Lifecycle primitives shared by sessions and the command line: waiting
//! for container state, label-scoped cleanup, and diagnostic dumps.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cleaner;
pub mod dump;
pub mod waiter;

pub use cleaner::{Cleaner, CleanupReport, Phase, PhaseReport};
pub use waiter::{Deadline, WaitCondition, Waiter};
