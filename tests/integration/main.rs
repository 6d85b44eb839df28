//! Fabric integration test harness.
//!
//! Engines here talk to each other through in-memory transports: whatever
//! one engine sends is handed to another as an observation, the way an
//! observer process would report it. `socket.rs` additionally exercises
//! the real UDP socket on loopback and skips when it cannot bind.
//!
//!   cargo test --test integration

use std::net::{IpAddr, SocketAddr};

use fabric_core::interface::{InterfaceInfo, Interfaces};
use fabric_core::wire::{BeaconPayload, BEACON_IPV6_MULTICAST};
use fabric_services::{
    BeaconingEngine, EngineSettings, MemoryTransport, Observation, TransportLog, TransportOp,
};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Addresses the two simulated hosts reply from.
pub const HOST_A: &str = "10.0.0.1:5240";
pub const HOST_B: &str = "10.0.0.2:5240";

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// An interface with a MAC derived from its index and the given links.
pub fn eth(name: &str, index: u32, mac_suffix: u8, links: &[&str]) -> InterfaceInfo {
    let mac = format!("52:54:00:00:{mac_suffix:02x}:{index:02x}");
    links.iter().fold(
        InterfaceInfo::new(name, index).with_mac(mac),
        |info, l| info.with_link(l.parse().unwrap()),
    )
}

pub fn inventory(list: Vec<InterfaceInfo>) -> Interfaces {
    list.into_iter().map(|i| (i.name.clone(), i)).collect()
}

pub fn node() -> (BeaconingEngine<MemoryTransport>, TransportLog) {
    node_with(EngineSettings::default())
}

pub fn node_with(settings: EngineSettings) -> (BeaconingEngine<MemoryTransport>, TransportLog) {
    let transport = MemoryTransport::new();
    let log = transport.log();
    (BeaconingEngine::new(settings, transport), log)
}

/// `beacon` as seen arriving on `ifname`, sent from `from` to `dest`.
pub fn heard(beacon: &BeaconPayload, from: SocketAddr, dest: IpAddr, ifname: &str) -> Observation {
    Observation {
        source_ip: Some(from.ip()),
        source_port: Some(from.port()),
        destination_ip: Some(dest),
        interface: Some(ifname.to_string()),
        payload: Some(serde_json::to_value(beacon).unwrap()),
        ..Observation::default()
    }
}

/// A multicast beacon as heard by a neighbour on the same link.
pub fn heard_multicast(beacon: &BeaconPayload, from: SocketAddr, ifname: &str) -> Observation {
    heard(beacon, from, IpAddr::V6(BEACON_IPV6_MULTICAST), ifname)
}

/// Translate one transport op into what a peer at `peer` on `ifname` sees.
///
/// Multicasts reach every peer. Unicasts reach only their destination.
pub fn delivered(op: &TransportOp, sender: SocketAddr, peer: SocketAddr, ifname: &str) -> Option<Observation> {
    let beacon = op.beacon()?;
    match op {
        TransportOp::Multicast { .. } => Some(heard_multicast(&beacon, sender, ifname)),
        TransportOp::Unicast { dest, .. } if *dest == peer => {
            Some(heard(&beacon, sender, dest.ip(), ifname))
        }
        _ => None,
    }
}

mod exchange;
mod fabric;
mod rounds;
mod socket;
