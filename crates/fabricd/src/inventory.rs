//! Local interface inventory, read from the OS.
//!
//! Addresses, flags, and hardware addresses come from `getifaddrs`. The
//! details it does not carry (VLAN id, PCI vendor/product, carrier) are
//! read from procfs/sysfs when present.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddrV4};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::{if_nametoindex, InterfaceFlags};
use nix::sys::socket::SockaddrStorage;

use fabric_core::interface::{format_mac, InterfaceInfo, Interfaces, Link};

/// Where the kernel exposes per-interface details.
#[derive(Debug, Clone)]
pub struct SysPaths {
    pub class_net: PathBuf,
    pub proc_vlan: PathBuf,
}

impl Default for SysPaths {
    fn default() -> Self {
        Self {
            class_net: PathBuf::from("/sys/class/net"),
            proc_vlan: PathBuf::from("/proc/net/vlan"),
        }
    }
}

/// Something that can produce the current interface inventory.
pub trait InterfaceSource: Send {
    fn discover(&mut self) -> Result<Interfaces>;
}

/// The host's own interfaces, optionally restricted to an allow-list.
pub struct SystemInterfaces {
    allow: Vec<String>,
    paths: SysPaths,
}

impl SystemInterfaces {
    pub fn new(allow: Vec<String>) -> Self {
        Self {
            allow,
            paths: SysPaths::default(),
        }
    }
}

impl InterfaceSource for SystemInterfaces {
    fn discover(&mut self) -> Result<Interfaces> {
        discover_interfaces(&self.allow, &self.paths)
    }
}

/// Read every non-loopback interface. An empty `allow` list means all.
pub fn discover_interfaces(allow: &[String], paths: &SysPaths) -> Result<Interfaces> {
    let mut interfaces = Interfaces::new();

    for ifaddr in getifaddrs().context("getifaddrs failed")? {
        let name = ifaddr.interface_name;
        if ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK) {
            continue;
        }
        if !allow.is_empty() && !allow.iter().any(|a| a == &name) {
            continue;
        }

        let info = interfaces.entry(name.clone()).or_insert_with(|| {
            let index = if_nametoindex(name.as_str()).unwrap_or(0);
            let mut info = InterfaceInfo::new(name.clone(), index);
            info.enabled = false;
            info
        });
        if ifaddr.flags.contains(InterfaceFlags::IFF_UP) {
            info.enabled = true;
        }

        let Some(address) = ifaddr.address.as_ref() else {
            continue;
        };
        if let Some(mac) = hardware_address(address) {
            info.mac_address = Some(mac);
        } else if let Some(link) = link_from(address, ifaddr.netmask.as_ref()) {
            if !info.links.contains(&link) {
                info.links.push(link);
            }
        }
    }

    for info in interfaces.values_mut() {
        apply_system_details(info, paths);
    }

    tracing::debug!(
        count = interfaces.len(),
        names = ?interfaces.keys().collect::<Vec<_>>(),
        "interfaces discovered"
    );
    Ok(interfaces)
}

fn hardware_address(addr: &SockaddrStorage) -> Option<String> {
    let bytes = addr.as_link_addr()?.addr()?;
    if bytes == [0u8; 6] {
        return None;
    }
    Some(format_mac(&bytes))
}

fn link_from(addr: &SockaddrStorage, netmask: Option<&SockaddrStorage>) -> Option<Link> {
    if let Some(sin) = addr.as_sockaddr_in() {
        let ip = *SocketAddrV4::from(*sin).ip();
        let prefix = netmask
            .and_then(|m| m.as_sockaddr_in())
            .map(|m| prefix_len_v4(*SocketAddrV4::from(*m).ip()))
            .unwrap_or(32);
        return Some(Link::new(IpAddr::V4(ip), prefix));
    }
    if let Some(sin6) = addr.as_sockaddr_in6() {
        let prefix = netmask
            .and_then(|m| m.as_sockaddr_in6())
            .map(|m| prefix_len_v6(m.ip()))
            .unwrap_or(128);
        return Some(Link::new(IpAddr::V6(sin6.ip()), prefix));
    }
    None
}

fn prefix_len_v4(mask: Ipv4Addr) -> u8 {
    u32::from(mask).count_ones() as u8
}

fn prefix_len_v6(mask: Ipv6Addr) -> u8 {
    u128::from(mask).count_ones() as u8
}

// ── procfs / sysfs ────────────────────────────────────────────────────────────

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Fill in VLAN id, vendor, product, and carrier where the kernel has them.
pub fn apply_system_details(info: &mut InterfaceInfo, paths: &SysPaths) {
    let dev = paths.class_net.join(&info.name);
    info.vendor = read_trimmed(&dev.join("device/vendor"));
    info.product = read_trimmed(&dev.join("device/device"));
    info.link_connected = read_trimmed(&dev.join("carrier")).and_then(|c| parse_carrier(&c));
    info.vid = read_trimmed(&paths.proc_vlan.join(&info.name)).and_then(|t| parse_vlan_id(&t));
}

/// `carrier` reads "1" or "0". Reading it on a downed link fails instead.
pub fn parse_carrier(text: &str) -> Option<bool> {
    match text.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

/// Pull the VID out of a `/proc/net/vlan/<ifname>` report.
///
/// The first line looks like `eth0.100  VID: 100	 REORDER_HDR: 1 ...`.
pub fn parse_vlan_id(text: &str) -> Option<u16> {
    let first = text.lines().next()?;
    let rest = &first[first.find("VID:")? + "VID:".len()..];
    rest.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_lengths_from_netmasks() {
        assert_eq!(prefix_len_v4(Ipv4Addr::new(255, 255, 255, 0)), 24);
        assert_eq!(prefix_len_v4(Ipv4Addr::new(255, 255, 240, 0)), 20);
        assert_eq!(prefix_len_v6("ffff:ffff:ffff:ffff::".parse().unwrap()), 64);
    }

    #[test]
    fn vlan_id_is_parsed_from_proc_report() {
        let report = "eth0.100  VID: 100\t REORDER_HDR: 1  dev->priv_flags: 1021\n";
        assert_eq!(parse_vlan_id(report), Some(100));
        assert_eq!(parse_vlan_id("garbage"), None);
        assert_eq!(parse_vlan_id(""), None);
    }

    #[test]
    fn carrier_values() {
        assert_eq!(parse_carrier("1\n"), Some(true));
        assert_eq!(parse_carrier("0"), Some(false));
        assert_eq!(parse_carrier("x"), None);
    }

    #[test]
    fn system_details_are_read_from_given_roots() {
        let root = std::env::temp_dir().join(format!("fabric-sysfs-test-{}", std::process::id()));
        let dev = root.join("class/net/eth0.7/device");
        std::fs::create_dir_all(&dev).unwrap();
        std::fs::create_dir_all(root.join("vlan")).unwrap();
        std::fs::write(dev.join("vendor"), "0x8086\n").unwrap();
        std::fs::write(dev.join("device"), "0x10d3\n").unwrap();
        std::fs::write(root.join("class/net/eth0.7/carrier"), "1\n").unwrap();
        std::fs::write(root.join("vlan/eth0.7"), "eth0.7  VID: 7\t REORDER_HDR: 1\n").unwrap();

        let paths = SysPaths {
            class_net: root.join("class/net"),
            proc_vlan: root.join("vlan"),
        };
        let mut info = InterfaceInfo::new("eth0.7", 9);
        apply_system_details(&mut info, &paths);

        assert_eq!(info.vendor.as_deref(), Some("0x8086"));
        assert_eq!(info.product.as_deref(), Some("0x10d3"));
        assert_eq!(info.link_connected, Some(true));
        assert_eq!(info.vid, Some(7));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn discovery_never_reports_loopback() {
        let interfaces = match discover_interfaces(&[], &SysPaths::default()) {
            Ok(i) => i,
            Err(e) => {
                eprintln!("SKIP: getifaddrs unavailable: {e}");
                return;
            }
        };
        assert!(!interfaces.contains_key("lo"));
    }
}
