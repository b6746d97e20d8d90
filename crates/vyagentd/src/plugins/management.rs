//! Start-up work for the management plane.
//!
//! Not request handlers: these run once from `main` before the server
//! accepts connections.

use std::net::IpAddr;

use tracing::{info, instrument, warn};
use vyagent_common::net;
use vyagent_config::Direction;

use crate::context::AgentContext;
use crate::error::CommandResult;
use crate::iptables::{self, IptablesRule, Protocol, Target, MANAGEMENT_RULE_COMMENT};

/// Description of the rule admitting management traffic.
pub const MANAGEMENT_RULE_DESCRIPTION: &str = "management-port-rule";

/// NIC used for management when the bootstrap file names none.
pub const DEFAULT_MANAGEMENT_NIC: &str = "eth0";

/// Resolves the management NIC from the bootstrap MAC.
pub async fn management_nic(agent: &AgentContext) -> CommandResult<String> {
    match agent.bootstrap().management_nic.as_ref().map(|m| m.mac.as_str()) {
        Some(mac) if !mac.is_empty() => agent.nic_by_mac(mac).await,
        _ => Ok(DEFAULT_MANAGEMENT_NIC.to_string()),
    }
}

/// Opens the agent's listen port on the management NIC.
///
/// A previous rule with the same description is replaced, so restarts do
/// not pile up duplicates. Must run under the configuration guard.
#[instrument(skip(agent))]
pub async fn configure_management_firewall(
    agent: &AgentContext,
    listen_ip: &str,
    port: u16,
) -> CommandResult<()> {
    let nic = management_nic(agent).await?;
    let address = management_address(agent, &nic, listen_ip).await?;

    if agent.bootstrap().skip_native_firewall() {
        let rule = IptablesRule::new(Protocol::Tcp, port, Target::Accept, MANAGEMENT_RULE_COMMENT)
            .with_destination(address.as_str());
        iptables::insert_local_rule(agent.runner(), &nic, &rule).await?;
        return Ok(());
    }

    let mut tree = agent.load_tree().await?;
    if let Some(rule) =
        tree.find_firewall_rule_by_description(&nic, Direction::Local, MANAGEMENT_RULE_DESCRIPTION)
    {
        tree.delete_firewall_rule(&rule);
    }
    let attributes = [
        format!("destination address {}", address),
        format!("destination port {}", port),
        "protocol tcp".to_string(),
        "action accept".to_string(),
        format!("description {}", MANAGEMENT_RULE_DESCRIPTION),
    ];
    let attributes: Vec<&str> = attributes.iter().map(String::as_str).collect();
    let number = tree.set_firewall_on_interface(&nic, Direction::Local, &attributes)?;
    tree.attach_firewall_to_interface(&nic, Direction::Local)?;
    agent.apply(&mut tree).await?;

    info!(nic = %nic, address = %address, port, number, "Management port opened");
    Ok(())
}

// A wildcard listen address cannot go into a destination match.
async fn management_address(agent: &AgentContext, nic: &str, listen_ip: &str) -> CommandResult<String> {
    let unspecified = listen_ip
        .parse::<IpAddr>()
        .map(|ip| ip.is_unspecified())
        .unwrap_or(false);
    if !unspecified {
        return Ok(listen_ip.to_string());
    }
    if let Some(ip) = agent
        .bootstrap()
        .management_nic
        .as_ref()
        .map(|m| m.ip.clone())
        .filter(|ip| !ip.is_empty())
    {
        return Ok(ip);
    }
    agent.ip_of(nic).await
}

/// Picks the address the PXE service answers on.
pub async fn choose_pxe_ip(agent: &AgentContext) -> CommandResult<String> {
    let pxenic = agent.bootstrap().require_pxenic()?;
    let cidrs = net::global_cidrs(agent.runner(), pxenic).await?;
    if cidrs.is_empty() {
        warn!(pxenic, "PXE NIC has no global address");
    }
    let ip = agent.bootstrap().choose_pxe_ip(&cidrs)?;
    info!(pxenic, ip = %ip, "PXE address chosen");
    Ok(ip)
}
