//! Interface lookups against the configuration tree.

use crate::error::{ConfigError, ConfigResult};
use crate::path::ConfigPath;
use crate::tree::ConfigTree;

/// Configuration path of an ethernet interface.
///
/// A VLAN sub-interface name `eth1.100` maps to
/// `interfaces ethernet eth1 vif 100`.
pub fn interface_path(interface: &str) -> ConfigResult<ConfigPath> {
    let base = ConfigPath::root("interfaces").child("ethernet");
    match interface.split_once('.') {
        None if !interface.is_empty() => Ok(base.child(interface)),
        Some((parent, vif))
            if !parent.is_empty() && !vif.is_empty() && vif.chars().all(|c| c.is_ascii_digit()) =>
        {
            Ok(base.child(parent).child("vif").child(vif))
        }
        _ => Err(ConfigError::invalid_path(
            interface,
            "expected an interface name like eth0 or eth0.100",
        )),
    }
}

impl ConfigTree {
    /// Name of the ethernet interface whose `hw-id` is `mac`.
    ///
    /// The comparison ignores case on the requested MAC; the stored value is
    /// lowercase on the appliance.
    pub fn find_interface_by_mac(&self, mac: &str) -> Option<String> {
        let ethernet = self.get(&ConfigPath::root("interfaces").child("ethernet"))?;
        let wanted = mac.to_lowercase();
        ethernet
            .children()
            .find(|eth| {
                eth.child("hw-id")
                    .and_then(|hw| hw.value())
                    .is_some_and(|hw| hw.to_lowercase() == wanted)
            })
            .map(|eth| eth.token().to_string())
    }

    /// Addresses configured on an interface, in order.
    pub fn interface_addresses(&self, interface: &str) -> ConfigResult<Vec<String>> {
        let path = interface_path(interface)?.child("address");
        Ok(self
            .get(&path)
            .map(|node| node.values().into_iter().map(str::to_string).collect())
            .unwrap_or_default())
    }
}

/// Parses `configuration` and looks up the interface owning `mac`.
pub fn find_nic_name_by_mac_from_configuration(
    mac: &str,
    configuration: &str,
) -> ConfigResult<Option<String>> {
    Ok(ConfigTree::parse(configuration)?.find_interface_by_mac(mac))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = "interfaces {
    ethernet eth0 {
        address 10.0.0.5/24
        hw-id 52:54:00:aa:bb:01
    }
    ethernet eth1 {
        address 172.16.0.1/24
        address 172.16.1.1/24
        hw-id 52:54:00:aa:bb:02
    }
}
";

    #[test]
    fn test_interface_path() {
        assert_eq!(interface_path("eth0").unwrap().to_string(), "interfaces ethernet eth0");
        assert_eq!(
            interface_path("eth1.100").unwrap().to_string(),
            "interfaces ethernet eth1 vif 100"
        );
        assert!(interface_path("").is_err());
        assert!(interface_path("eth1.").is_err());
        assert!(interface_path("eth1.abc").is_err());
    }

    #[test]
    fn test_find_by_mac() {
        assert_eq!(
            find_nic_name_by_mac_from_configuration("52:54:00:AA:BB:02", CONFIG).unwrap(),
            Some("eth1".to_string())
        );
        assert_eq!(
            find_nic_name_by_mac_from_configuration("52:54:00:aa:bb:99", CONFIG).unwrap(),
            None
        );
        assert_eq!(
            find_nic_name_by_mac_from_configuration("52:54:00:aa:bb:01", "").unwrap(),
            None
        );
    }

    #[test]
    fn test_interface_addresses() {
        let tree = ConfigTree::parse(CONFIG).unwrap();
        assert_eq!(
            tree.interface_addresses("eth1").unwrap(),
            vec!["172.16.0.1/24", "172.16.1.1/24"]
        );
        assert!(tree.interface_addresses("eth7").unwrap().is_empty());
    }
}
