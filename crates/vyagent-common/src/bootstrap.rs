//! Bootstrap settings handed to the agent by the management plane.
//!
//! The bootstrap file is a JSON object read exactly once at start-up. A
//! malformed file is fatal there and nowhere else: the parsed value is then
//! shared read-only with every component that needs it.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};
use crate::net;

/// Default path of the bootstrap file.
pub const DEFAULT_BOOTSTRAP_PATH: &str = "/var/lib/vyagent/agent.conf";

/// SSH port used when the bootstrap file does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Management NIC description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementNic {
    /// MAC address of the management NIC.
    #[serde(default)]
    pub mac: String,
    /// Address assigned to the management NIC.
    #[serde(default)]
    pub ip: String,
    /// Netmask of the management network.
    #[serde(default)]
    pub netmask: String,
    /// Gateway of the management network.
    #[serde(default)]
    pub gateway: String,
}

/// Operational parameters from the bootstrap file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    /// NIC serving PXE/DHCP for provisioning.
    #[serde(default)]
    pub pxenic: Option<String>,
    /// First address of the DHCP pool.
    #[serde(default)]
    pub dhcp_start_ip: Option<String>,
    /// Last address of the DHCP pool.
    #[serde(default)]
    pub dhcp_end_ip: Option<String>,
    /// Management NIC details.
    #[serde(default)]
    pub management_nic: Option<ManagementNic>,
    /// SSH port of the appliance.
    #[serde(default)]
    pub ssh_port: Option<u16>,
    /// Use raw iptables instead of the appliance's native firewall tree.
    #[serde(default)]
    pub skip_vyos_iptables: bool,
    /// Identifier of the router this agent runs on.
    #[serde(default)]
    pub routerid: String,
    /// Keys this agent does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BootstrapConfig {
    /// Parses bootstrap JSON.
    pub fn from_json(path: impl AsRef<Path>, content: &str) -> AgentResult<Self> {
        serde_json::from_str(content).map_err(|e| AgentError::Bootstrap {
            path: path.as_ref().to_path_buf(),
            message: format!("unable to parse JSON: {}", e),
        })
    }

    /// Reads and parses the bootstrap file.
    pub async fn load(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::io(path, e))?;
        if content.trim().is_empty() {
            return Err(AgentError::Bootstrap {
                path: path.to_path_buf(),
                message: "file is empty".to_string(),
            });
        }
        let config = Self::from_json(path, &content)?;
        tracing::debug!(
            path = %path.display(),
            skip_vyos_iptables = config.skip_vyos_iptables,
            "Loaded bootstrap configuration"
        );
        Ok(config)
    }

    /// SSH port, falling back to 22.
    pub fn ssh_port(&self) -> u16 {
        self.ssh_port.unwrap_or(DEFAULT_SSH_PORT)
    }

    /// Whether native firewall integration is skipped in favour of iptables.
    pub fn skip_native_firewall(&self) -> bool {
        self.skip_vyos_iptables
    }

    /// The PXE NIC, required for provisioning.
    pub fn require_pxenic(&self) -> AgentResult<&str> {
        match self.pxenic.as_deref() {
            Some(nic) if !nic.is_empty() => Ok(nic),
            _ => Err(AgentError::invalid_config("pxenic", "missing from bootstrap file")),
        }
    }

    /// Picks the PXE address among the CIDRs configured on the PXE NIC.
    ///
    /// The address whose network contains the DHCP start (or end) address
    /// wins; with neither bound matching, the first address is used. Start
    /// and end matching different addresses is an error, the pool would
    /// straddle two networks.
    pub fn choose_pxe_ip(&self, cidrs: &[String]) -> AgentResult<String> {
        let first = cidrs
            .first()
            .ok_or_else(|| AgentError::invalid_config("pxenic", "no address on PXE NIC"))?;

        let start = self.matching_host(self.dhcp_start_ip.as_deref(), cidrs)?;
        let end = self.matching_host(self.dhcp_end_ip.as_deref(), cidrs)?;

        match (start, end) {
            (None, None) => Ok(net::host_part(first).to_string()),
            (Some(ip), None) | (None, Some(ip)) => Ok(ip),
            (Some(a), Some(b)) if a == b => Ok(a),
            (Some(a), Some(b)) => Err(AgentError::invalid_config(
                "dhcpStartIp",
                format!("dhcp start address {} and end address {} are not in the same cidr", a, b),
            )),
        }
    }

    fn matching_host(&self, bound: Option<&str>, cidrs: &[String]) -> AgentResult<Option<String>> {
        let Some(bound) = bound.filter(|b| !b.is_empty()) else {
            return Ok(None);
        };
        for cidr in cidrs {
            if net::cidr_contains(cidr, bound)? {
                return Ok(Some(net::host_part(cidr).to_string()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cidrs() -> Vec<String> {
        vec!["10.0.0.5/24".to_string(), "192.168.10.1/24".to_string()]
    }

    #[test]
    fn test_defaults() {
        let config = BootstrapConfig::from_json("agent.conf", "{}").unwrap();
        assert_eq!(config.ssh_port(), 22);
        assert!(!config.skip_native_firewall());
        assert_eq!(config.routerid, "");
        assert!(config.require_pxenic().is_err());
    }

    #[test]
    fn test_parse_full() {
        let json = r#"{
            "pxenic": "eth1",
            "dhcpStartIp": "192.168.10.100",
            "dhcpEndIp": "192.168.10.200",
            "sshPort": 2222,
            "skipVyosIptables": true,
            "routerid": "vr-1",
            "managementNic": {"mac": "52:54:00:aa:bb:cc", "ip": "172.20.0.2"},
            "somethingElse": [1, 2]
        }"#;
        let config = BootstrapConfig::from_json("agent.conf", json).unwrap();
        assert_eq!(config.require_pxenic().unwrap(), "eth1");
        assert_eq!(config.ssh_port(), 2222);
        assert!(config.skip_native_firewall());
        assert_eq!(config.management_nic.unwrap().ip, "172.20.0.2");
        assert!(config.extra.contains_key("somethingElse"));
    }

    #[test]
    fn test_malformed_json() {
        let err = BootstrapConfig::from_json("agent.conf", "{not json").unwrap_err();
        assert!(matches!(err, AgentError::Bootstrap { .. }));
    }

    #[test]
    fn test_choose_pxe_ip_first_when_unbounded() {
        let config = BootstrapConfig::default();
        assert_eq!(config.choose_pxe_ip(&cidrs()).unwrap(), "10.0.0.5");
    }

    #[test]
    fn test_choose_pxe_ip_by_range() {
        let config = BootstrapConfig {
            dhcp_start_ip: Some("192.168.10.100".to_string()),
            dhcp_end_ip: Some("192.168.10.200".to_string()),
            ..Default::default()
        };
        assert_eq!(config.choose_pxe_ip(&cidrs()).unwrap(), "192.168.10.1");
    }

    #[test]
    fn test_choose_pxe_ip_split_range() {
        let config = BootstrapConfig {
            dhcp_start_ip: Some("10.0.0.100".to_string()),
            dhcp_end_ip: Some("192.168.10.200".to_string()),
            ..Default::default()
        };
        assert!(config.choose_pxe_ip(&cidrs()).is_err());
    }

    #[test]
    fn test_choose_pxe_ip_no_address() {
        assert!(BootstrapConfig::default().choose_pxe_ip(&[]).is_err());
    }

    #[tokio::test]
    async fn test_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = BootstrapConfig::load(file.path()).await.unwrap_err();
        assert!(matches!(err, AgentError::Bootstrap { .. }));
    }
}
