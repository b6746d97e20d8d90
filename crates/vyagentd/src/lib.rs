//! Control-plane agent daemon for VyOS appliances.
//!
//! The management plane drives the appliance over HTTP: each request path
//! selects a command handler, the JSON body carries its arguments. Handlers
//! that change configuration load the live tree, record mutations and
//! commit them as one transaction, serialized by the [`ConfigGuard`].
//!
//! # Architecture
//!
//! ```text
//! HTTP request
//!     |
//!     v
//! CommandRegistry::dispatch ----> 404 / 400 / 500
//!     |
//!     v
//! ConfigGuard (mutex + file lock)     read-only handlers skip this
//!     |
//!     v
//! handler: ConfigSource -> ConfigTree -> TransactionApplier
//! ```

pub mod context;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod iptables;
pub mod plugins;

pub use context::AgentContext;
pub use dispatch::{
    handler, reply, router, serve, ApiErrorResponse, CommandContext, CommandHandler, CommandRegistry,
    DispatchResponse, HandlerKind, HandlerResult, RequestPhase,
};
pub use error::{CommandError, CommandResult};
pub use guard::{ConfigGuard, DEFAULT_LOCK_PATH};

/// Default address the agent listens on.
pub const DEFAULT_LISTEN_IP: &str = "0.0.0.0";

/// Default port the agent listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 10002;

/// Builds the registry with every feature handler, guarded by `guard`.
pub fn build_registry(guard: &ConfigGuard) -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    plugins::register_all(&mut registry, guard);
    registry
}
