//! Raw iptables rules for appliances that skip the native firewall tree.
//!
//! Rules go into the `INPUT` chain, bound to one interface with `-i`, and
//! carry a comment that identifies the feature owning them.

use std::fmt;

use tracing::{debug, info};
use vyagent_common::shell::{CommandRunner, ShellCommand, IPTABLES_CMD};

use crate::error::CommandResult;

/// Comment tagging DNS rules.
pub const DNS_RULE_COMMENT: &str = "vyagent-dns";

/// Comment tagging the management port rule.
pub const MANAGEMENT_RULE_COMMENT: &str = "vyagent-management";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Accept,
    Return,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Target::Accept => "ACCEPT",
            Target::Return => "RETURN",
        })
    }
}

/// One local-traffic rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IptablesRule {
    pub protocol: Protocol,
    pub destination: Option<String>,
    pub dst_port: u16,
    pub target: Target,
    pub comment: String,
}

impl IptablesRule {
    pub fn new(protocol: Protocol, dst_port: u16, target: Target, comment: impl Into<String>) -> Self {
        Self {
            protocol,
            destination: None,
            dst_port,
            target,
            comment: comment.into(),
        }
    }

    /// Restricts the rule to one destination address.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    fn command(&self, action: &str, nic: &str) -> ShellCommand {
        let mut template = format!("{} {} INPUT -i {{{{nic}}}} -p {}", IPTABLES_CMD, action, self.protocol);
        if self.destination.is_some() {
            template.push_str(" -d {{dst}}");
        }
        template.push_str(&format!(
            " --dport {} -m comment --comment {{{{comment}}}} -j {}",
            self.dst_port, self.target
        ));

        let mut cmd = ShellCommand::new(template)
            .arg("nic", nic)
            .arg("comment", self.comment.as_str());
        if let Some(dst) = &self.destination {
            cmd = cmd.arg("dst", dst.as_str());
        }
        cmd
    }
}

/// Inserts `rule` for `nic` unless an identical rule exists.
///
/// Returns true if a rule was inserted.
pub async fn insert_local_rule(
    runner: &dyn CommandRunner,
    nic: &str,
    rule: &IptablesRule,
) -> CommandResult<bool> {
    let exists = runner.run(&rule.command("-C", nic)).await?.success();
    if exists {
        debug!(nic, comment = %rule.comment, "iptables rule already present");
        return Ok(false);
    }
    runner.run_checked(&rule.command("-I", nic)).await?;
    info!(nic, comment = %rule.comment, port = rule.dst_port, "iptables rule inserted");
    Ok(true)
}

/// Deletes every `INPUT` rule of `nic` tagged with `comment`.
///
/// Returns the number of rules deleted.
pub async fn delete_local_rules_by_comment(
    runner: &dyn CommandRunner,
    nic: &str,
    comment: &str,
) -> CommandResult<usize> {
    let listing = runner
        .run_checked(&ShellCommand::new(format!("{} -S INPUT", IPTABLES_CMD)).quiet())
        .await?;

    let iface = format!("-i {} ", nic);
    let tag = format!("--comment {}", comment);
    let mut deleted = 0;
    for listed in listing
        .lines()
        .filter_map(|l| l.strip_prefix("-A "))
        .filter(|l| l.contains(&iface) && (l.contains(&format!("{} ", tag)) || l.ends_with(&tag)))
    {
        let words: Vec<&str> = listed.split_whitespace().collect();
        let template = (0..words.len()).fold(format!("{} -D", IPTABLES_CMD), |mut t, i| {
            t.push_str(&format!(" {{{{w{}}}}}", i));
            t
        });
        let cmd = words
            .iter()
            .enumerate()
            .fold(ShellCommand::new(template), |cmd, (i, w)| cmd.arg(format!("w{}", i), *w));
        runner.run_checked(&cmd).await?;
        deleted += 1;
    }
    if deleted > 0 {
        info!(nic, comment, deleted, "iptables rules deleted");
    }
    Ok(deleted)
}
