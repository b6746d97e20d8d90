//! Network interface introspection.
//!
//! Thin wrappers around sysfs and the `ip` tool. Failures come back as
//! typed errors; each caller decides whether a missing NIC is fatal for its
//! own request.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use ipnetwork::IpNetwork;
use serde::Serialize;

use crate::error::{AgentError, AgentResult};
use crate::shell::{CommandRunner, ShellCommand, IP_CMD};

/// Default sysfs directory listing network interfaces.
pub const SYS_CLASS_NET: &str = "/sys/class/net";

/// A network interface and its hardware address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Nic {
    /// Kernel interface name, e.g. `eth1` or `eth1.100`.
    pub name: String,
    /// Lower-case MAC address.
    pub mac: String,
}

/// Lists interfaces under `root` (normally [`SYS_CLASS_NET`]).
///
/// Loopback and `ifb` devices are skipped, as are entries without an
/// `address` file.
pub async fn all_nics(root: &Path) -> AgentResult<BTreeMap<String, Nic>> {
    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|e| AgentError::io(root, e))?;

    let mut nics = BTreeMap::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AgentError::io(root, e))?
    {
        let name = entry.file_name().to_string_lossy().trim().to_string();
        if name == "lo" || name.contains("ifb") {
            continue;
        }
        let mac_file = entry.path().join("address");
        let mac = match tokio::fs::read_to_string(&mac_file).await {
            Ok(mac) => mac.trim().to_lowercase(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(AgentError::io(mac_file, e)),
        };
        nics.insert(name.clone(), Nic { name, mac });
    }

    Ok(nics)
}

/// Resolves the interface owning `mac`.
///
/// VLAN sub-interfaces share the parent's MAC; the parent name is
/// returned (`eth1.100` resolves to `eth1`).
pub async fn nic_name_by_mac(root: &Path, mac: &str) -> AgentResult<String> {
    let wanted = mac.trim().to_lowercase();
    let nics = all_nics(root).await?;
    nics.values()
        .find(|nic| nic.mac == wanted)
        .map(|nic| parent_interface(&nic.name).to_string())
        .ok_or_else(|| AgentError::nic_not_found(format!("cannot find any nic with the mac[{}]", mac)))
}

/// Returns the global-scope IPv4 CIDRs configured on `nic`.
pub async fn global_cidrs(runner: &dyn CommandRunner, nic: &str) -> AgentResult<Vec<String>> {
    let cmd = ShellCommand::new(format!(
        "{} -o -f inet addr show {{{{nic}}}} | awk '/scope global/ {{print $4}}'",
        IP_CMD
    ))
    .arg("nic", nic);
    let result = runner.run(&cmd).await?;
    if !result.success() {
        return Err(AgentError::nic_not_found(format!(
            "no ip with the nic[{}] found in the system",
            nic
        )));
    }
    Ok(result
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Returns the first global IPv4 address of `nic`, without prefix length.
pub async fn ip_by_nic_name(runner: &dyn CommandRunner, nic: &str) -> AgentResult<String> {
    global_ip(runner, nic)
        .await?
        .ok_or_else(|| AgentError::nic_not_found(format!("nic[{}] has no global address", nic)))
}

/// Like [`ip_by_nic_name`], but a NIC without a global address is `None`.
pub async fn global_ip(runner: &dyn CommandRunner, nic: &str) -> AgentResult<Option<String>> {
    match global_cidrs(runner, nic).await {
        Ok(cidrs) => Ok(cidrs.first().map(|cidr| host_part(cidr).to_string())),
        Err(AgentError::NicNotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Lists interfaces tagged `category:Private` in their link alias.
///
/// Lookup failures yield an empty list.
pub async fn private_interfaces(runner: &dyn CommandRunner) -> Vec<String> {
    let cmd = ShellCommand::new(format!(
        "{} link | grep -B 2 'category:Private' | grep '<BROADCAST,MULTICAST' | awk -F ':' '{{print $2}}'",
        IP_CMD
    ));
    match runner.run(&cmd).await {
        Ok(result) if result.success() => result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Ok(_) => Vec::new(),
        Err(e) => {
            tracing::debug!(error = %e, "Unable to list private interfaces");
            Vec::new()
        }
    }
}

/// Checks whether `ip` falls inside `cidr`. Host bits in `cidr` are allowed.
pub fn cidr_contains(cidr: &str, ip: &str) -> AgentResult<bool> {
    let network: IpNetwork = cidr
        .parse()
        .map_err(|e| AgentError::invalid_config("cidr", format!("{}: {}", cidr, e)))?;
    let addr: IpAddr = ip
        .parse()
        .map_err(|e| AgentError::invalid_config("ip", format!("{}: {}", ip, e)))?;
    Ok(network.contains(addr))
}

/// Strips the prefix length from `a.b.c.d/n`.
pub fn host_part(cidr: &str) -> &str {
    cidr.split('/').next().unwrap_or(cidr)
}

/// Strips a VLAN suffix from an interface name.
pub fn parent_interface(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}
