//! Availability-group listener settings.

use serde::{Deserialize, Serialize};

/// Port used when the document does not set one.
pub const DEFAULT_LISTENER_PORT: u16 = 1433;

fn default_listener_port() -> u16 {
    DEFAULT_LISTENER_PORT
}

/// One static address of the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerAddress {
    /// IPv4 or IPv6 address.
    pub address: String,
    /// IPv4 subnet mask; absent for IPv6 addresses.
    #[serde(default)]
    pub subnet_mask: Option<String>,
}

/// Client access point of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerSpec {
    /// Network name, at most 15 characters.
    pub name: String,
    /// TCP port.
    #[serde(default = "default_listener_port")]
    pub port: u16,
    /// Obtain the address from DHCP instead of `addresses`.
    #[serde(default)]
    pub dhcp: bool,
    /// Static addresses, one per subnet.
    #[serde(default)]
    pub addresses: Vec<ListenerAddress>,
}

impl ListenerSpec {
    /// A DHCP listener on the default port.
    pub fn dhcp(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: DEFAULT_LISTENER_PORT,
            dhcp: true,
            addresses: Vec::new(),
        }
    }

    /// Add a static address, turning DHCP off.
    pub fn with_address(mut self, address: impl Into<String>, subnet_mask: Option<&str>) -> Self {
        self.dhcp = false;
        self.addresses.push(ListenerAddress {
            address: address.into(),
            subnet_mask: subnet_mask.map(str::to_string),
        });
        self
    }

    /// Problems that make the listener impossible to create, if any.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("listener name is empty".to_string());
        }
        if self.name.chars().count() > 15 {
            problems.push(format!(
                "listener name '{}' exceeds 15 characters",
                self.name
            ));
        }
        if self.port == 0 {
            problems.push("listener port must be greater than zero".to_string());
        }
        if !self.dhcp && self.addresses.is_empty() {
            problems.push("listener needs DHCP or at least one static address".to_string());
        }
        if self.dhcp && self.addresses.len() > 1 {
            problems.push("a DHCP listener takes at most one subnet".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_listener_without_addresses_is_flagged() {
        let mut listener = ListenerSpec::dhcp("aglistener");
        assert!(listener.problems().is_empty());
        listener.dhcp = false;
        assert_eq!(listener.problems().len(), 1);
    }

    #[test]
    fn netbios_length_limit() {
        let listener = ListenerSpec::dhcp("a-very-long-listener-name");
        assert!(listener.problems()[0].contains("15 characters"));
    }
}
