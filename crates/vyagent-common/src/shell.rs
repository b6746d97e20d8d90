//! Shell command execution utilities.
//!
//! This module runs external commands with captured output, proper
//! quoting and optional `{{name}}` argument substitution. Long multi-line
//! scripts can be staged in a temporary file instead of being passed on
//! the command line.
//!
//! # Example
//!
//! ```ignore
//! use vyagent_common::shell::{ShellCommand, IP_CMD};
//!
//! let out = ShellCommand::new(format!("{IP_CMD} -o -f inet addr show {{{{nic}}}}"))
//!     .arg("nic", "eth0")
//!     .run_checked()
//!     .await?;
//! ```
//!
//! There is no built-in timeout: a caller that needs a deadline wraps the
//! future in `tokio::time::timeout` itself.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tokio::process::Command;

use crate::error::{AgentError, AgentResult};

/// Path to the `ip` command for network interface configuration.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `bash` shell for complex command sequences.
pub const BASH_CMD: &str = "/bin/bash";

/// Path to the `su` command used to drop to the configuration account.
pub const SU_CMD: &str = "/bin/su";

/// Path to the `iptables` command for native firewall rules.
pub const IPTABLES_CMD: &str = "/sbin/iptables";

/// Path to the `vtysh` routing shell.
pub const VTYSH_CMD: &str = "/usr/bin/vtysh";

/// Path to the configuration shell API used to dump the live configuration.
pub const CLI_SHELL_API: &str = "/bin/cli-shell-api";

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Regex for `{{name}}` argument placeholders.
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("Invalid regex pattern")
});

/// Quotes a string for safe use in shell commands.
///
/// This function wraps the string in double quotes and escapes any
/// characters that have special meaning inside double quotes:
/// `$`, `` ` ``, `"`, `\` and newline.
///
/// # Example
///
/// ```
/// use vyagent_common::shell::shellquote;
///
/// assert_eq!(shellquote("simple"), "\"simple\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// assert_eq!(shellquote("with\"quote"), "\"with\\\"quote\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The stdout output.
    pub stdout: String,
    /// The stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Builds a successful result with the given stdout. Mostly useful for
    /// fake runners.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Executes a shell command asynchronously.
///
/// The command runs through `/bin/sh -c` to support pipes, redirects and
/// command chaining. A non-zero exit code is not an error here; only a
/// failure to spawn is.
pub async fn exec(cmd: &str) -> AgentResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");
    run_sh(cmd, cmd).await
}

/// Executes a shell command and fails on non-zero exit.
///
/// Returns the trimmed stdout on success.
pub async fn exec_checked(cmd: &str) -> AgentResult<String> {
    let result = exec(cmd).await?;
    check(cmd, result)
}

/// Writes `script` to a temporary file and runs it with bash.
///
/// The temporary file is removed when this function returns, whatever the
/// outcome.
pub async fn exec_script(script: &str) -> AgentResult<ExecResult> {
    let mut staged = tempfile::Builder::new()
        .prefix("vyagent")
        .suffix(".sh")
        .tempfile()
        .map_err(|e| AgentError::io(std::env::temp_dir(), e))?;
    let path = staged.path().to_path_buf();
    staged
        .write_all(script.as_bytes())
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| AgentError::io(&path, e))?;

    let cmd = format!("{} {}", BASH_CMD, shellquote(&path.to_string_lossy()));
    tracing::debug!(script = %path.display(), "Executing staged script");
    run_sh(&cmd, &cmd).await
}

async fn run_sh(cmd: &str, shown: &str) -> AgentResult<ExecResult> {
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| AgentError::ShellExec {
            command: shown.to_string(),
            source: e,
        })?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    let result = ExecResult {
        exit_code,
        stdout,
        stderr,
    };

    if result.success() {
        tracing::trace!(command = %shown, exit_code = exit_code, "Command succeeded");
    } else {
        tracing::warn!(
            command = %shown,
            exit_code = exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

fn check(cmd: &str, result: ExecResult) -> AgentResult<String> {
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(AgentError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

/// Substitutes `{{name}}` placeholders with shell-quoted argument values.
///
/// A placeholder without a matching argument is an error rather than an
/// empty string, so a typo cannot silently change the command.
pub fn render_template(template: &str, args: &BTreeMap<String, String>) -> AgentResult<String> {
    let mut missing = None;
    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match args.get(name) {
            Some(value) => shellquote(value),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(AgentError::invalid_config(
            name,
            format!("no argument supplied for placeholder in '{}'", template),
        )),
        None => Ok(rendered.into_owned()),
    }
}

/// A command line with optional templated arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommand {
    template: String,
    args: BTreeMap<String, String>,
    quiet: bool,
    staged: bool,
}

impl ShellCommand {
    /// Creates a command from a template; plain commands need no arguments.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            ..Self::default()
        }
    }

    /// Supplies the value for a `{{name}}` placeholder.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Keeps the command text out of the logs.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Runs the command from a temporary script file instead of `sh -c`.
    pub fn staged(mut self) -> Self {
        self.staged = true;
        self
    }

    /// Returns true if the command is staged to a temporary file.
    pub fn is_staged(&self) -> bool {
        self.staged
    }

    /// Renders the final command text.
    pub fn render(&self) -> AgentResult<String> {
        render_template(&self.template, &self.args)
    }

    /// Runs the command, returning its result whatever the exit code.
    pub async fn run(&self) -> AgentResult<ExecResult> {
        let cmd = self.render()?;
        if !self.quiet {
            tracing::debug!(command = %cmd, staged = self.staged, "Running command");
        }
        if self.staged {
            exec_script(&cmd).await
        } else {
            run_sh(&cmd, if self.quiet { "<quiet>" } else { &cmd }).await
        }
    }

    /// Runs the command and fails on non-zero exit.
    pub async fn run_checked(&self) -> AgentResult<String> {
        let result = self.run().await?;
        check(&self.template, result)
    }
}

/// Executes commands on behalf of the agent.
///
/// Everything above this layer goes through a runner so that tests can
/// substitute canned command output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command, returning its result whatever the exit code.
    async fn run(&self, cmd: &ShellCommand) -> AgentResult<ExecResult>;

    /// Runs the command and fails on non-zero exit.
    async fn run_checked(&self, cmd: &ShellCommand) -> AgentResult<String> {
        let result = self.run(cmd).await?;
        let shown = cmd.render().unwrap_or_default();
        check(&shown, result)
    }
}

/// The real runner: spawns `/bin/sh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Shell;

#[async_trait]
impl CommandRunner for Shell {
    async fn run(&self, cmd: &ShellCommand) -> AgentResult<ExecResult> {
        cmd.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellquote_simple() {
        assert_eq!(shellquote("simple"), "\"simple\"");
        assert_eq!(shellquote("eth0"), "\"eth0\"");
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hello\""), "\"say \\\"hello\\\"\"");
        assert_eq!(shellquote("path\\to"), "\"path\\\\to\"");
        assert_eq!(shellquote("line1\nline2"), "\"line1\\\nline2\"");
    }

    #[test]
    fn test_shellquote_empty() {
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 0,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert_eq!(result.combined_output(), "stdout\nstderr");

        let result = ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "error message".to_string(),
        };
        assert!(!result.success());
        assert_eq!(result.combined_output(), "error message");
    }

    #[test]
    fn test_render_template() {
        let cmd = ShellCommand::new("ip -o -f inet addr show {{nic}} | awk '{print $4}'")
            .arg("nic", "eth0");
        assert_eq!(
            cmd.render().unwrap(),
            "ip -o -f inet addr show \"eth0\" | awk '{print $4}'"
        );
    }

    #[test]
    fn test_render_template_quotes_values() {
        let cmd = ShellCommand::new("echo {{ msg }}").arg("msg", "$(reboot)");
        assert_eq!(cmd.render().unwrap(), "echo \"\\$(reboot)\"");
    }

    #[test]
    fn test_render_template_missing_argument() {
        let err = ShellCommand::new("ping {{host}}").render().unwrap_err();
        match err {
            AgentError::InvalidConfig { field, .. } => assert_eq!(field, "host"),
            other => panic!("Expected InvalidConfig, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_failure() {
        let result = exec("exit 42").await.unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test]
    async fn test_exec_checked_failure() {
        match exec_checked("exit 1").await {
            Err(AgentError::ShellCommandFailed { exit_code, .. }) => assert_eq!(exit_code, 1),
            other => panic!("Expected ShellCommandFailed error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_staged_script_runs_multiline() {
        let result = ShellCommand::new("A=1\nB=2\necho $((A + B))")
            .staged()
            .run()
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "3");
    }

    #[tokio::test]
    async fn test_shell_runner_checked() {
        let out = Shell
            .run_checked(&ShellCommand::new("echo {{word}}").arg("word", "ok"))
            .await
            .unwrap();
        assert_eq!(out, "ok");
    }
}
