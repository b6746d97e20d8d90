//! Test fixtures for common agent scenarios
//!
//! Provides reusable live configurations, fake sysfs trees and request
//! bodies.

use serde_json::{json, Value};
use tempfile::TempDir;
use vyagent_config::ConfigTree;

/// Builds a live configuration dump from `set` lines.
#[derive(Debug, Clone, Default)]
pub struct LiveConfig {
    lines: Vec<String>,
}

impl LiveConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw `set` path (without the `set` keyword)
    pub fn with(mut self, path: impl Into<String>) -> Self {
        self.lines.push(path.into());
        self
    }

    /// Add an ethernet interface with its MAC and address
    pub fn with_ethernet(self, nic: &str, mac: &str, address: &str) -> Self {
        self.with(format!("interfaces ethernet {} hw-id {}", nic, mac))
            .with(format!("interfaces ethernet {} address {}", nic, address))
    }

    /// Add a DNS forwarding name server
    pub fn with_name_server(self, server: &str) -> Self {
        self.with(format!("service dns forwarding name-server {}", server))
    }

    /// Add a DNS forwarding listen address
    pub fn with_listen_address(self, address: &str) -> Self {
        self.with(format!("service dns forwarding listen-address {}", address))
    }

    /// Add a next-hop static route
    pub fn with_route(self, destination: &str, target: &str, distance: u32) -> Self {
        self.with(format!(
            "protocols static route {} next-hop {} distance {}",
            destination, target, distance
        ))
    }

    /// Add a blackhole static route
    pub fn with_blackhole(self, destination: &str, distance: u32) -> Self {
        self.with(format!(
            "protocols static route {} blackhole distance {}",
            destination, distance
        ))
    }

    /// Add one attribute line of a numbered firewall rule
    pub fn with_firewall_rule(self, ruleset: &str, number: u32, attribute: &str) -> Self {
        self.with(format!("firewall name {} rule {} {}", ruleset, number, attribute))
    }

    /// The configuration as flat `set` lines
    pub fn to_set_lines(&self) -> String {
        self.lines
            .iter()
            .map(|l| format!("set {}\n", l))
            .collect()
    }

    /// The configuration in the bracketed form the appliance dumps
    pub fn build(&self) -> String {
        ConfigTree::parse(&self.to_set_lines())
            .map(|tree| tree.render())
            .unwrap_or_else(|e| panic!("fixture lines do not parse: {e}"))
    }
}

/// A small appliance: management NIC plus one private NIC serving DNS
pub fn two_nic_appliance() -> LiveConfig {
    LiveConfig::new()
        .with_ethernet("eth0", "52:54:00:00:00:01", "10.0.0.5/24")
        .with_ethernet("eth1", "52:54:00:00:00:02", "172.16.0.1/24")
}

/// Creates a fake `/sys/class/net` with the given `(name, mac)` entries
pub fn fake_sysfs(nics: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    for (name, mac) in nics {
        let nic_dir = dir.path().join(name);
        std::fs::create_dir(&nic_dir).unwrap_or_else(|e| panic!("create {name}: {e}"));
        std::fs::write(nic_dir.join("address"), format!("{}\n", mac))
            .unwrap_or_else(|e| panic!("write {name}/address: {e}"));
    }
    dir
}

/// Request body fixtures
pub mod requests {
    use super::*;

    /// Body for `/setdns`, `/removedns` and `/setvpcdns`
    pub fn dns(servers: &[&str], macs: &[&str]) -> Value {
        json!({ "dns": servers, "nicMac": macs })
    }

    /// Body for the route endpoints; an empty target means blackhole
    pub fn routes(routes: &[(&str, &str, u32)]) -> Value {
        let routes: Vec<Value> = routes
            .iter()
            .map(|(destination, target, distance)| {
                json!({ "destination": destination, "target": target, "distance": distance })
            })
            .collect();
        json!({ "routes": routes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vyagent_config::ConfigPath;

    #[test]
    fn test_live_config_builds_bracketed_dump() {
        let text = two_nic_appliance().with_name_server("8.8.8.8").build();
        assert!(text.starts_with("interfaces {\n"));
        let tree = ConfigTree::parse(&text).unwrap();
        assert!(tree.has(&ConfigPath::parse("service dns forwarding name-server 8.8.8.8").unwrap()));
        assert_eq!(tree.find_interface_by_mac("52:54:00:00:00:02").as_deref(), Some("eth1"));
    }

    #[test]
    fn test_route_body() {
        let body = requests::routes(&[("10.1.0.0/24", "", 1)]);
        assert_eq!(body["routes"][0]["target"], "");
        assert_eq!(body["routes"][0]["distance"], 1);
    }

    #[test]
    fn test_fake_sysfs_layout() {
        let dir = fake_sysfs(&[("eth0", "52:54:00:00:00:01")]);
        let mac = std::fs::read_to_string(dir.path().join("eth0/address")).unwrap();
        assert_eq!(mac.trim(), "52:54:00:00:00:01");
    }
}
