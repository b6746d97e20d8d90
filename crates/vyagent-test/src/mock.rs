//! In-memory stand-ins for the appliance and the shell.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use vyagent_common::{AgentResult, CommandRunner, ExecResult, ShellCommand};
use vyagent_config::applier::render_script;
use vyagent_config::{
    ApplyReport, ConfigError, ConfigResult, ConfigSource, ConfigTree, Mutation, TransactionApplier,
};

/// One committed (or dry-run) transaction seen by a [`FakeDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransaction {
    /// Mutations in commit order.
    pub mutations: Vec<Mutation>,
    /// True if this was a dry run.
    pub dry_run: bool,
}

impl AppliedTransaction {
    /// The rendered `set`/`delete` lines.
    pub fn lines(&self) -> Vec<String> {
        self.mutations.iter().map(Mutation::render).collect()
    }
}

/// A fake appliance: serves its configuration and commits transactions by
/// replaying them onto it.
///
/// Tracks how many transactions were in flight at once so tests can prove
/// that guarded handlers never overlap.
#[derive(Debug, Default)]
pub struct FakeDevice {
    config: RwLock<String>,
    transactions: Mutex<Vec<AppliedTransaction>>,
    commit_delay: Duration,
    fail_commits: Mutex<Option<(i32, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeDevice {
    /// Create a device holding `config`
    pub fn new(config: impl Into<String>) -> Self {
        Self {
            config: RwLock::new(config.into()),
            ..Self::default()
        }
    }

    /// Make every commit take `delay`, widening any race window
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = delay;
        self
    }

    /// Make subsequent commits fail with `exit_code` and `output`
    pub fn fail_commits(&self, exit_code: i32, output: impl Into<String>) {
        *self.fail_commits.lock() = Some((exit_code, output.into()));
    }

    /// The current configuration text
    pub fn config(&self) -> String {
        self.config.read().clone()
    }

    /// The current configuration parsed
    pub fn tree(&self) -> ConfigTree {
        ConfigTree::parse(&self.config()).unwrap_or_else(|e| panic!("device config: {e}"))
    }

    /// Transactions seen so far, in commit order
    pub fn transactions(&self) -> Vec<AppliedTransaction> {
        self.transactions.lock().clone()
    }

    /// Number of committed (non dry-run) transactions
    pub fn commit_count(&self) -> usize {
        self.transactions.lock().iter().filter(|t| !t.dry_run).count()
    }

    /// Highest number of transactions ever applied concurrently
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn replay(&self, mutations: &[Mutation]) -> ConfigResult<()> {
        let mut tree = ConfigTree::parse(&self.config())?;
        for mutation in mutations {
            match mutation {
                Mutation::Set(p) | Mutation::SetNoCheck(p) => {
                    tree.set(p.clone());
                }
                Mutation::Delete(p) => {
                    tree.delete(p.clone());
                }
            }
        }
        *self.config.write() = tree.render();
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for FakeDevice {
    async fn show_configuration(&self) -> ConfigResult<String> {
        Ok(self.config())
    }
}

#[async_trait]
impl TransactionApplier for FakeDevice {
    async fn apply(&self, mutations: &[Mutation], dry_run: bool) -> ConfigResult<ApplyReport> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.commit_delay.is_zero() {
            tokio::time::sleep(self.commit_delay).await;
        }

        self.transactions.lock().push(AppliedTransaction {
            mutations: mutations.to_vec(),
            dry_run,
        });

        let failure = self.fail_commits.lock().clone();
        let result = match failure {
            _ if dry_run => Ok(false),
            Some((exit_code, output)) => Err(ConfigError::CommitFailed { exit_code, output }),
            None => self.replay(mutations).map(|_| true),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(lines = mutations.len(), dry_run, "Fake device transaction");

        let executed = result?;
        Ok(ApplyReport {
            script: render_script(mutations),
            lines: mutations.len(),
            executed,
            output: String::new(),
        })
    }
}

/// A command runner answering from a list of canned responses.
///
/// The first response whose pattern is a substring of the rendered command
/// wins; unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct MockRunner {
    responses: Vec<(String, ExecResult)>,
    commands: Mutex<Vec<String>>,
}

impl MockRunner {
    /// Create a runner with no canned responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `stdout`
    pub fn respond(mut self, pattern: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.responses.push((pattern.into(), ExecResult::ok(stdout)));
        self
    }

    /// Fail commands containing `pattern`
    pub fn fail(mut self, pattern: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        self.responses.push((
            pattern.into(),
            ExecResult {
                exit_code,
                stdout: String::new(),
                stderr: stderr.into(),
            },
        ));
        self
    }

    /// Answer the global-address lookup for `nic` with `cidr`
    pub fn with_nic_address(self, nic: &str, cidr: &str) -> Self {
        self.respond(format!("addr show \"{}\"", nic), cidr)
    }

    /// Every rendered command run so far
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Rendered commands containing `pattern`
    pub fn commands_matching(&self, pattern: &str) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.contains(pattern))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, cmd: &ShellCommand) -> AgentResult<ExecResult> {
        let rendered = cmd.render()?;
        self.commands.lock().push(rendered.clone());
        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| rendered.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| ExecResult::ok("")))
    }
}
