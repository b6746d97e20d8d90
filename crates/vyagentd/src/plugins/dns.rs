//! DNS forwarding endpoints.
//!
//! The appliance forwards DNS for tenant networks: the management plane
//! pushes the upstream servers and the NICs (by MAC) the forwarder listens
//! on. Listening on a NIC also opens port 53 in that NIC's local firewall,
//! either as a native ruleset entry or as raw iptables rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};
use vyagent_common::net;
use vyagent_config::{ConfigPath, ConfigTree, Direction};

use crate::context::AgentContext;
use crate::dispatch::{handler, CommandContext, CommandRegistry, HandlerResult};
use crate::error::CommandResult;
use crate::guard::ConfigGuard;
use crate::iptables::{self, IptablesRule, Protocol, Target, DNS_RULE_COMMENT};

pub const SET_DNS_PATH: &str = "/setdns";
pub const REMOVE_DNS_PATH: &str = "/removedns";
pub const SET_VPC_DNS_PATH: &str = "/setvpcdns";

const DNS_PORT: u16 = 53;

/// Body shared by the three DNS endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsCommand {
    /// Upstream servers, in the order the forwarder should try them.
    #[serde(default)]
    pub dns: Vec<String>,
    /// MACs of the NICs to listen on.
    #[serde(default)]
    pub nic_mac: Vec<String>,
}

pub fn register(registry: &mut CommandRegistry, guard: &ConfigGuard) {
    registry.register_async_command_handler(SET_DNS_PATH, guard.wrap(handler(set_dns)));
    registry.register_async_command_handler(REMOVE_DNS_PATH, guard.wrap(handler(remove_dns)));
    registry.register_async_command_handler(SET_VPC_DNS_PATH, guard.wrap(handler(set_vpc_dns)));
}

/// Description of the firewall rule opening DNS on `nic`.
pub fn dns_rule_description(nic: &str) -> String {
    format!("DNS-for-{}", nic)
}

fn forwarding() -> ConfigPath {
    ConfigPath::root("service").child("dns").child("forwarding")
}

/// Replaces the forwarding configuration.
#[instrument(skip_all, fields(path = %ctx.path()))]
pub async fn set_dns(ctx: CommandContext) -> HandlerResult {
    let cmd: DnsCommand = ctx.command()?;
    let agent = ctx.agent();
    let mut tree = agent.load_tree().await?;

    tree.delete(forwarding());
    tree.set(forwarding().child("allow-from").child("0.0.0.0/0"));
    for server in &cmd.dns {
        tree.set_no_check(forwarding().child("name-server").try_child(server.as_str())?);
    }

    for mac in &cmd.nic_mac {
        let nic = agent.nic_by_mac(mac).await?;
        let ip = agent.ip_of(&nic).await?;
        tree.set_no_check(forwarding().child("listen-address").child(ip));
        open_dns_port(agent, &mut tree, &nic).await?;
    }

    agent.apply(&mut tree).await?;
    info!(servers = cmd.dns.len(), nics = cmd.nic_mac.len(), "DNS forwarding configured");
    Ok(Value::Null)
}

/// Removes the given servers and listen addresses.
#[instrument(skip_all, fields(path = %ctx.path()))]
pub async fn remove_dns(ctx: CommandContext) -> HandlerResult {
    let cmd: DnsCommand = ctx.command()?;
    let agent = ctx.agent();
    let mut tree = agent.load_tree().await?;

    for server in &cmd.dns {
        tree.delete(forwarding().child("name-server").try_child(server.as_str())?);
    }
    for mac in &cmd.nic_mac {
        let nic = agent.nic_by_mac(mac).await?;
        match agent.global_ip_of(&nic).await? {
            Some(ip) => {
                tree.delete(forwarding().child("listen-address").child(ip));
            }
            None => debug!(nic = %nic, "No global address, no listen address to remove"),
        }
    }

    agent.apply(&mut tree).await?;
    Ok(Value::Null)
}

/// Rebuilds DNS for a VPC router from scratch.
///
/// Old DNS firewall rules on every private NIC go first. An empty server
/// or NIC list leaves DNS removed.
#[instrument(skip_all, fields(path = %ctx.path()))]
pub async fn set_vpc_dns(ctx: CommandContext) -> HandlerResult {
    let cmd: DnsCommand = ctx.command()?;
    let agent = ctx.agent();
    let mut tree = agent.load_tree().await?;

    tree.delete(ConfigPath::root("service").child("dns"));
    for nic in net::private_interfaces(agent.runner()).await {
        close_dns_port(agent, &mut tree, &nic).await?;
    }

    if cmd.dns.is_empty() || cmd.nic_mac.is_empty() {
        debug!("No DNS servers or listen NICs, DNS stays removed");
        agent.apply(&mut tree).await?;
        return Ok(Value::Null);
    }

    let mut nics = Vec::with_capacity(cmd.nic_mac.len());
    for mac in &cmd.nic_mac {
        nics.push(agent.nic_by_mac(mac).await?);
    }
    for nic in &nics {
        let ip = agent.ip_of(nic).await?;
        tree.set_no_check(forwarding().child("listen-address").child(ip));
        open_dns_port(agent, &mut tree, nic).await?;
    }
    for server in &cmd.dns {
        tree.set_no_check(forwarding().child("name-server").try_child(server.as_str())?);
    }

    agent.apply(&mut tree).await?;
    info!(servers = cmd.dns.len(), nics = ?nics, "VPC DNS configured");
    Ok(Value::Null)
}

async fn open_dns_port(agent: &AgentContext, tree: &mut ConfigTree, nic: &str) -> CommandResult<()> {
    if agent.bootstrap().skip_native_firewall() {
        for protocol in [Protocol::Udp, Protocol::Tcp] {
            let rule = IptablesRule::new(protocol, DNS_PORT, Target::Return, DNS_RULE_COMMENT);
            iptables::insert_local_rule(agent.runner(), nic, &rule).await?;
        }
        return Ok(());
    }

    let description = dns_rule_description(nic);
    if tree
        .find_firewall_rule_by_description(nic, Direction::Local, &description)
        .is_some()
    {
        return Ok(());
    }
    let description = format!("description {}", description);
    tree.set_firewall_on_interface(
        nic,
        Direction::Local,
        &[&description, "destination port 53", "protocol tcp_udp", "action accept"],
    )?;
    tree.attach_firewall_to_interface(nic, Direction::Local)?;
    Ok(())
}

async fn close_dns_port(agent: &AgentContext, tree: &mut ConfigTree, nic: &str) -> CommandResult<()> {
    if agent.bootstrap().skip_native_firewall() {
        iptables::delete_local_rules_by_comment(agent.runner(), nic, DNS_RULE_COMMENT).await?;
        return Ok(());
    }
    if let Some(rule) =
        tree.find_firewall_rule_by_description(nic, Direction::Local, &dns_rule_description(nic))
    {
        tree.delete_firewall_rule(&rule);
    }
    Ok(())
}
