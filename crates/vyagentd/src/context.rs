//! Agent-wide state shared by every handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vyagent_common::net::{self, SYS_CLASS_NET};
use vyagent_common::{BootstrapConfig, CommandRunner, Shell};
use vyagent_config::{
    ApplyReport, CliConfigSource, ConfigSource, ConfigTree, RuleNumbering, ScriptApplier,
    TransactionApplier,
};

use crate::error::CommandResult;
use crate::guard::ConfigGuard;

/// Everything a handler needs besides its request.
///
/// Built once at start-up and shared through an `Arc`.
pub struct AgentContext {
    bootstrap: BootstrapConfig,
    runner: Arc<dyn CommandRunner>,
    source: Arc<dyn ConfigSource>,
    applier: Arc<dyn TransactionApplier>,
    guard: ConfigGuard,
    numbering: RuleNumbering,
    sys_net_root: PathBuf,
}

impl AgentContext {
    /// Creates a context talking to the real appliance through `runner`.
    pub fn new(bootstrap: BootstrapConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            bootstrap,
            source: Arc::new(CliConfigSource::new(runner.clone())),
            applier: Arc::new(ScriptApplier::new(runner.clone())),
            runner,
            guard: ConfigGuard::default(),
            numbering: RuleNumbering::default(),
            sys_net_root: PathBuf::from(SYS_CLASS_NET),
        }
    }

    /// Replaces where the live configuration is read from.
    pub fn with_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = source;
        self
    }

    /// Replaces how transactions are committed.
    pub fn with_applier(mut self, applier: Arc<dyn TransactionApplier>) -> Self {
        self.applier = applier;
        self
    }

    /// Replaces the transaction guard.
    pub fn with_guard(mut self, guard: ConfigGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Replaces the firewall rule numbering policy.
    pub fn with_rule_numbering(mut self, numbering: RuleNumbering) -> Self {
        self.numbering = numbering;
        self
    }

    /// Reads NICs from `root` instead of `/sys/class/net`.
    pub fn with_sys_net_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sys_net_root = root.into();
        self
    }

    pub fn bootstrap(&self) -> &BootstrapConfig {
        &self.bootstrap
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn guard(&self) -> &ConfigGuard {
        &self.guard
    }

    pub fn sys_net_root(&self) -> &Path {
        &self.sys_net_root
    }

    /// Loads the active configuration into a fresh tree.
    pub async fn load_tree(&self) -> CommandResult<ConfigTree> {
        let tree = self.source.load_tree().await?;
        Ok(tree.with_rule_numbering(self.numbering.clone()))
    }

    /// Commits the tree's pending mutations.
    pub async fn apply(&self, tree: &mut ConfigTree) -> CommandResult<ApplyReport> {
        Ok(tree.apply(self.applier.as_ref(), false).await?)
    }

    /// Interface name owning `mac`.
    pub async fn nic_by_mac(&self, mac: &str) -> CommandResult<String> {
        Ok(net::nic_name_by_mac(&self.sys_net_root, mac).await?)
    }

    /// First global IPv4 address of `nic`.
    pub async fn ip_of(&self, nic: &str) -> CommandResult<String> {
        Ok(net::ip_by_nic_name(self.runner.as_ref(), nic).await?)
    }

    /// First global IPv4 address of `nic`, if it has one.
    pub async fn global_ip_of(&self, nic: &str) -> CommandResult<Option<String>> {
        Ok(net::global_ip(self.runner.as_ref(), nic).await?)
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(BootstrapConfig::default(), Arc::new(Shell))
            .with_guard(ConfigGuard::new(std::env::temp_dir().join("vyagentd-unit.lock")))
    }
}

impl Default for AgentContext {
    fn default() -> Self {
        Self::new(BootstrapConfig::default(), Arc::new(Shell))
    }
}
