//! Local interface inventory as the beaconing engine sees it.
//!
//! The inventory is produced outside the engine (by the daemon's interface
//! monitor, or by tests) and handed over whole on every change.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::wire::BeaconRemote;

/// Interface name → interface metadata. Ordered so rounds are deterministic.
pub type Interfaces = BTreeMap<String, InterfaceInfo>;

/// One address configured on an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub address: IpAddr,
    pub prefix_len: u8,
}

impl Link {
    pub fn new(address: IpAddr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
        }
    }

    pub fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Link {
    type Err = LinkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| LinkParseError(s.to_string()))?;
        let address: IpAddr = addr.parse().map_err(|_| LinkParseError(s.to_string()))?;
        let prefix_len: u8 = prefix.parse().map_err(|_| LinkParseError(s.to_string()))?;
        let max = if address.is_ipv6() { 128 } else { 32 };
        if prefix_len > max {
            return Err(LinkParseError(s.to_string()));
        }
        Ok(Self::new(address, prefix_len))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid link {0:?}, expected address/prefix")]
pub struct LinkParseError(String);

/// Metadata for a single local interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    /// OS interface index, used as the IPv6 multicast selector.
    pub index: u32,
    pub mac_address: Option<String>,
    /// Only enabled interfaces join groups or send beacons.
    pub enabled: bool,
    /// VLAN id for 802.1Q sub-interfaces.
    pub vid: Option<u16>,
    pub links: Vec<Link>,
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub link_connected: Option<bool>,
}

impl InterfaceInfo {
    /// An enabled interface with no addresses or hardware details.
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
            mac_address: None,
            enabled: true,
            vid: None,
            links: Vec::new(),
            vendor: None,
            product: None,
            link_connected: None,
        }
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// First IPv4 address, the selector for the IPv4 group membership.
    pub fn first_ipv4(&self) -> Option<Ipv4Addr> {
        self.links.iter().find_map(|l| match l.address {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
    }

    /// Reduced descriptor sent to peers. `vid` overrides the interface's own.
    pub fn beacon_remote(&self, vid: Option<u16>) -> BeaconRemote {
        BeaconRemote {
            name: self.name.clone(),
            mac_address: self.mac_address.clone(),
            vid: vid.or(self.vid),
            subnet: None,
            vendor: self.vendor.clone(),
            product: self.product.clone(),
            link_connected: self.link_connected,
        }
    }
}

/// Enabled interfaces only.
pub fn enabled_interfaces(interfaces: &Interfaces) -> impl Iterator<Item = &InterfaceInfo> {
    interfaces.values().filter(|i| i.enabled)
}

/// Render a hardware address as lowercase colon-separated hex.
pub fn format_mac(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_parses_and_displays() {
        let link: Link = "10.0.0.5/24".parse().unwrap();
        assert_eq!(link.address, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(link.prefix_len, 24);
        assert_eq!(link.to_string(), "10.0.0.5/24");

        let v6: Link = "fe80::1/64".parse().unwrap();
        assert!(v6.is_ipv6());
    }

    #[test]
    fn link_rejects_bad_input() {
        assert!("10.0.0.5".parse::<Link>().is_err());
        assert!("10.0.0.5/33".parse::<Link>().is_err());
        assert!("nope/24".parse::<Link>().is_err());
    }

    #[test]
    fn first_ipv4_skips_ipv6_links() {
        let info = InterfaceInfo::new("eth0", 2)
            .with_link("fe80::1/64".parse().unwrap())
            .with_link("10.0.0.5/24".parse().unwrap())
            .with_link("10.0.1.5/24".parse().unwrap());
        assert_eq!(info.first_ipv4(), Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn beacon_remote_prefers_explicit_vid() {
        let mut info = InterfaceInfo::new("eth0.100", 5).with_mac("52:54:00:00:00:01");
        info.vid = Some(100);

        let remote = info.beacon_remote(None);
        assert_eq!(remote.name, "eth0.100");
        assert_eq!(remote.vid, Some(100));
        assert_eq!(remote.mac_address.as_deref(), Some("52:54:00:00:00:01"));

        assert_eq!(info.beacon_remote(Some(200)).vid, Some(200));
    }

    #[test]
    fn format_mac_is_lowercase_colon_hex() {
        assert_eq!(
            format_mac(&[0x52, 0x54, 0x00, 0xAB, 0xcd, 0x01]),
            "52:54:00:ab:cd:01"
        );
    }
}
