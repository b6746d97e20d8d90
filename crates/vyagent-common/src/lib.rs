//! Common infrastructure for the vyagent appliance agent.
//!
//! This crate holds the operating-system facing pieces that every other
//! vyagent crate builds on:
//!
//! - [`shell`]: command execution with quoting, templated arguments and
//!   temp-file staging, behind the [`CommandRunner`] seam
//! - [`bootstrap`]: typed bootstrap settings, read once at start-up
//! - [`net`]: NIC enumeration and address lookups
//! - [`error`]: error types shared by the above
//!
//! # Example
//!
//! ```ignore
//! use vyagent_common::shell::{ShellCommand, Shell, CommandRunner, IP_CMD};
//!
//! async fn link_up(nic: &str) -> vyagent_common::AgentResult<()> {
//!     let cmd = ShellCommand::new(format!("{IP_CMD} link set {{{{nic}}}} up")).arg("nic", nic);
//!     Shell.run_checked(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod error;
pub mod net;
pub mod shell;

// Re-export commonly used items at crate root
pub use bootstrap::BootstrapConfig;
pub use error::{AgentError, AgentResult};
pub use shell::{CommandRunner, ExecResult, Shell, ShellCommand};
