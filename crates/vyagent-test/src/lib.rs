//! Test infrastructure for vyagent
//!
//! Provides:
//! - A fake appliance that serves and commits configuration in memory
//! - A command runner with canned output
//! - Live-configuration and request fixtures
//! - Commit-script assertions

pub mod fixtures;
mod mock;
mod verification;

pub use fixtures::*;
pub use mock::{AppliedTransaction, FakeDevice, MockRunner};
pub use verification::*;
