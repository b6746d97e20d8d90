//! Where the live configuration comes from.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vyagent_common::shell::{CommandRunner, ShellCommand, CLI_SHELL_API};

use crate::error::ConfigResult;
use crate::tree::ConfigTree;

/// Supplies the appliance's active configuration as text.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Returns the active configuration in bracketed form.
    async fn show_configuration(&self) -> ConfigResult<String>;

    /// Loads a fresh tree from the active configuration.
    async fn load_tree(&self) -> ConfigResult<ConfigTree> {
        let text = self.show_configuration().await?;
        let tree = ConfigTree::parse(&text)?;
        debug!(keys = ?tree.top_level_keys(), "Loaded active configuration");
        Ok(tree)
    }
}

/// Reads the configuration through the appliance's shell API.
pub struct CliConfigSource {
    runner: Arc<dyn CommandRunner>,
}

impl CliConfigSource {
    /// Creates a source running commands through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ConfigSource for CliConfigSource {
    async fn show_configuration(&self) -> ConfigResult<String> {
        let cmd = ShellCommand::new(format!("{} showCfg --show-active-only", CLI_SHELL_API)).quiet();
        Ok(self.runner.run_checked(&cmd).await?)
    }
}
