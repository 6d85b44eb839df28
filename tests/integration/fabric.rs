use fabric_core::hint::HintKind;
use fabric_core::wire::{BeaconData, BeaconPayload, BeaconRemote, BeaconType};
use fabric_services::MulticastSource;
use tokio::time::Instant;

use crate::*;

fn advertisement_from(name: &str, mac: &str) -> BeaconPayload {
    let remote = BeaconRemote {
        name: name.into(),
        mac_address: Some(mac.into()),
        ..BeaconRemote::default()
    };
    BeaconPayload::new(BeaconType::Advertisement, BeaconData::with_remote(remote))
}

/// Two local ports cabled into the same switch hear the same neighbour.
#[test]
fn two_ports_on_one_switch_share_a_fabric() {
    let now = Instant::now();
    let (mut a, _) = node();
    a.update_interfaces(
        inventory(vec![eth("eth0", 2, 0xa, &[]), eth("eth1", 3, 0xa, &[])]),
        now,
    );

    let ad = advertisement_from("ens3", "52:54:00:00:0b:02");
    let first = a
        .beacon_received(&heard_multicast(&ad, addr(HOST_B), "eth0"), now)
        .unwrap();
    assert!(!first.duplicate);
    let second = a
        .beacon_received(&heard_multicast(&ad, addr(HOST_B), "eth1"), now)
        .unwrap();
    assert!(second.duplicate);

    let hints = a.topology_hints();
    let same: Vec<_> = hints
        .iter()
        .filter(|h| h.hint == HintKind::SameLocalFabricAs)
        .collect();
    assert_eq!(same.len(), 2);
    for hint in &same {
        assert!(hints.contains(&hint.reversed()));
        assert_eq!(hint.related_mac, None);
    }
    let neighbours: Vec<_> = hints
        .iter()
        .filter(|h| h.hint == HintKind::OnRemoteNetwork)
        .filter_map(|h| h.ifname.as_deref())
        .collect();
    assert_eq!(neighbours, vec!["eth0", "eth1"]);
}

/// The same frame seen on two VLANs of one trunk port.
#[test]
fn vlans_on_one_port_are_distinct_sides() {
    let now = Instant::now();
    let (mut a, _) = node();
    a.update_interfaces(inventory(vec![eth("eth0", 2, 0xa, &[])]), now);

    let ad = BeaconPayload::new(BeaconType::Advertisement, BeaconData::default());
    let mut tagged = heard_multicast(&ad, addr(HOST_B), "eth0");
    tagged.vid = Some(10);
    a.beacon_received(&tagged, now).unwrap();
    tagged.vid = Some(20);
    let outcome = a.beacon_received(&tagged, now).unwrap();
    assert!(outcome.duplicate);

    let hints = a.topology_hints();
    assert_eq!(hints.len(), 2);
    assert!(hints.iter().all(|h| h.ifname.as_deref() == Some("eth0")
        && h.related_ifname.as_deref() == Some("eth0")
        && h.vid != h.related_vid));

    // Hearing it again on a side already known adds nothing.
    tagged.vid = Some(10);
    a.beacon_received(&tagged, now).unwrap();
    assert_eq!(a.topology_hints().len(), 2);
}

/// A bridge between two of our ports loops our own beacons back.
#[test]
fn bridged_ports_hear_each_others_beacons() {
    let now = Instant::now();
    let (mut a, a_log) = node();
    a.update_interfaces(
        inventory(vec![eth("eth0", 2, 0xa, &[]), eth("eth1", 3, 0xa, &[])]),
        now,
    );
    assert_eq!(a.fire_due(now), Some(2));

    let sent = a_log.multicasts();
    for (source, beacon) in &sent {
        let (tx, rx) = match source {
            MulticastSource::V6(2) => ("eth0", "eth1"),
            MulticastSource::V6(3) => ("eth1", "eth0"),
            other => panic!("unexpected source {other:?}"),
        };
        let outcome = a
            .beacon_received(&heard_multicast(beacon, addr(HOST_A), rx), now)
            .unwrap();
        assert!(outcome.own_beacon);
        let hint = outcome.hints.iter().next().unwrap();
        assert_eq!(hint.hint, HintKind::RxOwnBeaconOnOtherInterface);
        assert_eq!(hint.ifname.as_deref(), Some(rx));
        assert_eq!(hint.related_ifname.as_deref(), Some(tx));
    }

    let hints = a.topology_hints();
    assert_eq!(hints.len(), 2);
    assert!(hints.iter().all(|h| !h.hint.is_fault()));
    // Own solicitations are never answered.
    assert!(a_log.unicasts().is_empty());
}
