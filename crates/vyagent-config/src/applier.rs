//! Transaction applier: turns a mutation log into one appliance commit.
//!
//! The mutation log is rendered into a `vbash` script that enters
//! configuration mode, replays every line, commits and reports failure
//! through its exit status. The script is staged in a temporary file owned
//! by the configuration account and executed as that account, because the
//! appliance only accepts configuration sessions from it.

use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use nix::unistd::{chown, Group, User};
use serde::Serialize;
use tempfile::TempPath;
use tracing::{debug, info, instrument, warn};
use vyagent_common::shell::{CommandRunner, ShellCommand, BASH_CMD, SU_CMD};

use crate::error::{ConfigError, ConfigResult};
use crate::tree::Mutation;

/// Lines placed before the mutation lines.
pub const SCRIPT_PREAMBLE: &str =
    "#!/bin/vbash\nsource /opt/vyatta/etc/functions/script-template\n\nconfigure\n";

/// Lines placed after the mutation lines.
pub const SCRIPT_EPILOGUE: &str =
    "commit\n\nif [ $? -ne 0 ]; then\n\techo \"fail to commit\"\n\texit 1\nelse\n\texit\nfi\n";

/// Account the commit script runs as by default.
pub const DEFAULT_SCRIPT_USER: &str = "vyos";

/// Group owning the staged script by default.
pub const DEFAULT_SCRIPT_GROUP: &str = "users";

/// Renders the commit script for `mutations`, one line each, in order.
pub fn render_script(mutations: &[Mutation]) -> String {
    let mut script = String::from(SCRIPT_PREAMBLE);
    for mutation in mutations {
        script.push_str(&mutation.render());
        script.push('\n');
    }
    script.push_str(SCRIPT_EPILOGUE);
    script
}

/// Outcome of one [`TransactionApplier::apply`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// The rendered script, empty when there was nothing to apply.
    pub script: String,
    /// Number of mutation lines in the script.
    pub lines: usize,
    /// True if the script was executed.
    pub executed: bool,
    /// Output of the script.
    pub output: String,
}

/// Applies a batch of mutations as one transaction.
#[async_trait]
pub trait TransactionApplier: Send + Sync {
    /// Commits `mutations` in order, or only renders them when `dry_run`.
    async fn apply(&self, mutations: &[Mutation], dry_run: bool) -> ConfigResult<ApplyReport>;
}

/// Who runs the commit script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptPrivilege {
    /// Hand the script to `user` through `su`, owned by `user:group`.
    Account {
        /// Login name.
        user: String,
        /// Owning group.
        group: String,
    },
    /// Run the script directly as the agent's own user.
    Agent,
}

impl Default for ScriptPrivilege {
    fn default() -> Self {
        ScriptPrivilege::Account {
            user: DEFAULT_SCRIPT_USER.to_string(),
            group: DEFAULT_SCRIPT_GROUP.to_string(),
        }
    }
}

/// The production applier.
pub struct ScriptApplier {
    runner: Arc<dyn CommandRunner>,
    privilege: ScriptPrivilege,
    staging_dir: PathBuf,
}

impl ScriptApplier {
    /// Creates an applier running scripts as the default account.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            privilege: ScriptPrivilege::default(),
            staging_dir: std::env::temp_dir(),
        }
    }

    /// Selects who runs the script.
    pub fn with_privilege(mut self, privilege: ScriptPrivilege) -> Self {
        self.privilege = privilege;
        self
    }

    /// Stages scripts under `dir` instead of the system temp directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Writes the script to a private temp file, hands it to the target
    /// account and makes it executable.
    ///
    /// The write handle is closed before returning: the kernel refuses to
    /// exec a file that is still open for writing.
    fn stage(&self, script: &str) -> ConfigResult<TempPath> {
        let mut file = tempfile::Builder::new()
            .prefix("vyagent")
            .tempfile_in(&self.staging_dir)
            .map_err(|e| ConfigError::staging(&self.staging_dir, e))?;
        let path = file.path().to_path_buf();
        file.write_all(script.as_bytes())
            .and_then(|_| file.as_file().sync_all())
            .map_err(|e| ConfigError::staging(&path, e))?;
        let staged = file.into_temp_path();

        if let ScriptPrivilege::Account { user, group } = &self.privilege {
            hand_over(&staged, user, group)?;
        }
        fs::set_permissions(&staged, Permissions::from_mode(0o750))
            .map_err(|e| ConfigError::staging(&path, e))?;
        Ok(staged)
    }

    fn command_for(&self, script: &Path) -> ShellCommand {
        let path = script.to_string_lossy().into_owned();
        match &self.privilege {
            ScriptPrivilege::Account { user, .. } => {
                ShellCommand::new(format!("{} - {{{{user}}}} -c {{{{script}}}}", SU_CMD))
                    .arg("user", user.as_str())
                    .arg("script", path)
            }
            ScriptPrivilege::Agent => {
                ShellCommand::new(format!("{} {{{{script}}}}", BASH_CMD)).arg("script", path)
            }
        }
    }
}

fn hand_over(path: &Path, user: &str, group: &str) -> ConfigResult<()> {
    let uid = User::from_name(user)
        .map_err(|e| ConfigError::staging(path, e))?
        .ok_or_else(|| ConfigError::staging(path, format!("no such user: {}", user)))?
        .uid;
    let gid = Group::from_name(group)
        .map_err(|e| ConfigError::staging(path, e))?
        .ok_or_else(|| ConfigError::staging(path, format!("no such group: {}", group)))?
        .gid;
    chown(path, Some(uid), Some(gid)).map_err(|e| ConfigError::staging(path, e))
}

#[async_trait]
impl TransactionApplier for ScriptApplier {
    #[instrument(skip(self, mutations), fields(lines = mutations.len()))]
    async fn apply(&self, mutations: &[Mutation], dry_run: bool) -> ConfigResult<ApplyReport> {
        let script = render_script(mutations);
        if dry_run {
            info!("Dry run, commit script not executed");
            return Ok(ApplyReport {
                script,
                lines: mutations.len(),
                executed: false,
                output: String::new(),
            });
        }

        // Removed from disk when dropped, on every path out of here.
        let staged = self.stage(&script)?;
        debug!(script = %script, "[Configure VYOS]");

        let result = self.runner.run(&self.command_for(&staged)).await?;
        if !result.success() {
            warn!(exit_code = result.exit_code, "Configuration commit failed");
            return Err(ConfigError::CommitFailed {
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }

        info!("Configuration committed");
        Ok(ApplyReport {
            script,
            lines: mutations.len(),
            executed: true,
            output: result.stdout,
        })
    }
}
