//! Feature handlers served by the agent.
//!
//! Each module owns a set of request paths and registers them with
//! [`register_all`]. Handlers that commit configuration are registered
//! wrapped in the [`ConfigGuard`]; read-only ones are not.

pub mod dns;
pub mod management;
pub mod route;

use tracing::info;

use crate::dispatch::CommandRegistry;
use crate::guard::ConfigGuard;

/// Registers every feature handler.
pub fn register_all(registry: &mut CommandRegistry, guard: &ConfigGuard) {
    dns::register(registry, guard);
    route::register(registry, guard);
    info!(paths = ?registry.paths(), "Feature handlers registered");
}
