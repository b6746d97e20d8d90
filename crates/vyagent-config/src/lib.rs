//! Configuration-tree engine for VyOS-style appliances.
//!
//! The appliance stores its configuration as a tree of tokens and accepts
//! changes as `set`/`delete` commands inside a configuration session. This
//! crate models that:
//!
//! - [`ConfigTree`] parses the live dump, answers queries and records
//!   mutations without touching the device
//! - [`TransactionApplier`] commits a mutation log as one script
//! - [`ConfigSource`] fetches the active configuration
//! - the firewall and interface helpers build the paths features need
//!
//! # Example
//!
//! ```ignore
//! use vyagent_config::{config_path, ConfigSource, TransactionApplier};
//!
//! async fn blackhole(source: &dyn ConfigSource, applier: &dyn TransactionApplier) -> vyagent_config::ConfigResult<()> {
//!     let mut tree = source.load_tree().await?;
//!     tree.set(config_path!("protocols static route {} blackhole", "10.9.0.0/16")?);
//!     tree.apply(applier, false).await?;
//!     Ok(())
//! }
//! ```

pub mod applier;
pub mod error;
pub mod firewall;
pub mod interfaces;
mod lexer;
mod parser;
pub mod path;
pub mod source;
pub mod tree;

pub use applier::{ApplyReport, ScriptApplier, ScriptPrivilege, TransactionApplier};
pub use error::{ConfigError, ConfigResult};
pub use firewall::{Direction, FirewallRule, RuleNumbering};
pub use interfaces::{find_nic_name_by_mac_from_configuration, interface_path};
pub use path::ConfigPath;
pub use source::{CliConfigSource, ConfigSource};
pub use tree::{ConfigNode, ConfigTree, Mutation};
