use std::time::Duration;

use fabric_core::wire::{beacon_uuid_at, unix_now, BeaconData, BeaconPayload, BeaconRemote, BeaconType};
use fabric_services::{EngineSettings, EngineState, Membership, TransportOp};
use tokio::time::Instant;

use crate::*;

fn foreign(kind: BeaconType) -> BeaconPayload {
    foreign_named(kind, "ens3")
}

fn foreign_named(kind: BeaconType, name: &str) -> BeaconPayload {
    let remote = BeaconRemote {
        name: name.into(),
        mac_address: Some("52:54:00:00:0b:02".into()),
        ..BeaconRemote::default()
    };
    BeaconPayload::new(kind, BeaconData::with_remote(remote))
}

/// A burst of solicitations from the link costs one round, not one each.
#[test]
fn solicitation_storm_is_rate_limited() {
    let t0 = Instant::now();
    let (mut a, a_log) = node();
    a.update_interfaces(inventory(vec![eth("eth0", 2, 0xa, &[])]), t0);
    assert_eq!(a.fire_due(t0), Some(1));
    a_log.clear();

    for i in 0..20u64 {
        let at = t0 + Duration::from_millis(100 * i);
        a.beacon_received(
            &heard_multicast(&foreign(BeaconType::Solicitation), addr(HOST_B), "eth0"),
            at,
        )
        .unwrap();
        assert_eq!(a.fire_due(at), None);
    }

    // Every solicitation is still answered directly.
    assert_eq!(a_log.unicasts().len(), 20);
    assert!(a_log.multicasts().is_empty());

    let due = t0 + Duration::from_secs(5);
    assert_eq!(a.next_deadline(), Some(due));
    assert_eq!(a.fire_due(due - Duration::from_millis(1)), None);
    assert_eq!(a.fire_due(due), Some(1));
    assert_eq!(a_log.multicasts()[0].1.kind, BeaconType::Advertisement);
    assert_eq!(a.next_deadline(), None);
}

/// A pending advertisement round is upgraded, never downgraded.
#[test]
fn pending_round_upgrades_to_solicitation() {
    let t0 = Instant::now();
    let (mut a, a_log) = node();
    a.update_interfaces(inventory(vec![eth("eth0", 2, 0xa, &[])]), t0);
    a.fire_due(t0);

    a.request_broadcast(BeaconType::Advertisement, t0);
    a.request_broadcast(BeaconType::Solicitation, t0);
    a.request_broadcast(BeaconType::Advertisement, t0);
    a_log.clear();

    assert_eq!(a.fire_due(t0 + Duration::from_secs(5)), Some(1));
    let rounds = a_log.multicasts();
    assert_eq!(rounds.len(), 1);
    assert_eq!(rounds[0].1.kind, BeaconType::Solicitation);
}

/// Growing the inventory joins groups for the new interface only, and
/// shrinking it leaves them again.
#[test]
fn inventory_changes_reconcile_memberships() {
    let t0 = Instant::now();
    let (mut a, a_log) = node();
    let eth0 = eth("eth0", 2, 0xa, &["10.0.0.1/24"]);
    let eth1 = eth("eth1", 3, 0xa, &["10.0.1.1/24", "fe80::3/64"]);

    let first = a.update_interfaces(inventory(vec![eth0.clone()]), t0);
    assert_eq!(first.joined.len(), 2);
    a.fire_due(t0);
    a_log.clear();

    let grown = a.update_interfaces(inventory(vec![eth0.clone(), eth1]), t0);
    assert_eq!(
        grown.joined,
        vec![
            Membership::V4 {
                interface: "10.0.1.1".parse().unwrap()
            },
            Membership::V6 { index: 3 },
        ]
    );
    assert!(grown.left.is_empty());
    // New interface, new solicitation round.
    assert_eq!(a.status(t0).pending_round, Some(BeaconType::Solicitation));

    a_log.clear();
    let shrunk = a.update_interfaces(inventory(vec![eth0]), t0);
    assert!(shrunk.joined.is_empty());
    assert_eq!(shrunk.left.len(), 2);
    assert!(a_log
        .ops()
        .iter()
        .all(|op| matches!(op, TransportOp::Leave(_))));
    assert_eq!(a.state(), EngineState::Active);

    a.update_interfaces(inventory(vec![]), t0);
    assert_eq!(a.state(), EngineState::Idle);
    assert_eq!(a.next_deadline(), None);
    assert_eq!(a.status(t0).memberships, 0);
}

/// A disabled interface is known but never beaconed on.
#[test]
fn disabled_interfaces_stay_quiet() {
    let t0 = Instant::now();
    let (mut a, a_log) = node();
    let mut down = eth("eth1", 3, 0xa, &[]);
    down.enabled = false;
    a.update_interfaces(inventory(vec![eth("eth0", 2, 0xa, &[]), down]), t0);

    assert_eq!(a.fire_due(t0), Some(1));
    assert!(a_log
        .multicasts()
        .iter()
        .all(|(_, b)| b.remote().map(|r| r.name.as_str()) == Some("eth0")));
    assert_eq!(a.status(t0).interfaces, vec!["eth0".to_string()]);
}

/// Hints derived from beacons outside the aging window are forgotten.
#[test]
fn stale_beacons_age_out() {
    let now = Instant::now();
    let (mut a, _) = node_with(EngineSettings {
        aging_window: Duration::from_secs(60),
        ..EngineSettings::default()
    });
    a.update_interfaces(inventory(vec![eth("eth0", 2, 0xa, &[])]), now);

    let mut stale = foreign_named(BeaconType::Advertisement, "ens3");
    stale.uuid = beacon_uuid_at(unix_now() - 600.0);
    let mut future = foreign_named(BeaconType::Advertisement, "ens4");
    future.uuid = beacon_uuid_at(unix_now() + 600.0);
    let fresh = foreign_named(BeaconType::Advertisement, "ens5");

    for beacon in [&stale, &future, &fresh] {
        a.beacon_received(&heard_multicast(beacon, addr(HOST_B), "eth0"), now)
            .unwrap();
    }

    let hints = a.topology_hints();
    assert_eq!(hints.len(), 1);
    assert_eq!(
        hints.iter().next().and_then(|h| h.related_ifname.as_deref()),
        Some("ens5")
    );
    let status = a.status(now);
    assert_eq!(status.rx_queued, 1);
    assert_eq!(status.stats.beacons_received, 3);
}
