use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use fabric_core::hint::{HintKind, TopologyHint};
use fabric_core::wire::BeaconType;
use fabric_services::engine::{self, EngineHandle};
use fabric_services::{BeaconingEngine, EngineSettings, MemoryTransport, TransportOp};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::*;

/// Solicit, reply, advertise: the full handshake between two hosts.
#[test]
fn solicitation_is_answered_by_unicast_then_advertised() {
    let t0 = Instant::now();
    let (mut a, a_log) = node();
    let (mut b, b_log) = node();
    a.update_interfaces(inventory(vec![eth("eth0", 2, 0xa, &[])]), t0);
    b.update_interfaces(inventory(vec![eth("ens3", 2, 0xb, &[])]), t0);
    assert_eq!(a.fire_due(t0), Some(1));
    assert_eq!(b.fire_due(t0), Some(1));

    let (_, solicitation) = a_log.multicasts()[0].clone();
    assert_eq!(solicitation.kind, BeaconType::Solicitation);

    // B hears A's solicitation on its link.
    b_log.clear();
    let at_b = b
        .beacon_received(&heard_multicast(&solicitation, addr(HOST_A), "ens3"), t0)
        .unwrap();
    assert!(at_b.replied);
    assert!(!at_b.own_beacon);
    let hint = at_b.hints.iter().next().unwrap();
    assert_eq!(hint.hint, HintKind::OnRemoteNetwork);
    assert_eq!(hint.ifname.as_deref(), Some("ens3"));
    assert_eq!(hint.related_ifname.as_deref(), Some("eth0"));
    assert_eq!(hint.related_mac.as_deref(), Some("52:54:00:00:0a:02"));

    let replies = b_log.unicasts();
    assert_eq!(replies.len(), 1);
    let (dest, reply) = replies[0].clone();
    assert_eq!(dest, addr(HOST_A));
    assert_eq!(reply.kind, BeaconType::Advertisement);
    assert_eq!(reply.payload.acks, Some(solicitation.uuid));

    // B already ran a round at t0, so its advertisement round waits.
    assert_eq!(b.next_deadline(), Some(t0 + Duration::from_secs(5)));
    assert_eq!(b.status(t0).pending_round, Some(BeaconType::Advertisement));

    // A hears the unicast reply: routable, and no further round.
    let at_a = a
        .beacon_received(&heard(&reply, addr(HOST_B), addr(HOST_A).ip(), "eth0"), t0)
        .unwrap();
    assert!(!at_a.replied);
    assert_eq!(at_a.hints.iter().next().map(|h| h.hint), Some(HintKind::RoutableTo));
    assert_eq!(a.next_deadline(), None);

    // B's advertisement round reaches A over multicast.
    b_log.clear();
    assert_eq!(b.fire_due(t0 + Duration::from_secs(5)), Some(1));
    let (_, advertisement) = b_log.multicasts()[0].clone();
    assert_eq!(advertisement.kind, BeaconType::Advertisement);
    a.beacon_received(&heard_multicast(&advertisement, addr(HOST_B), "eth0"), t0)
        .unwrap();
    assert_eq!(a.next_deadline(), None);

    let kinds: BTreeSet<HintKind> = a.topology_hints().iter().map(|h| h.hint).collect();
    assert_eq!(
        kinds,
        BTreeSet::from([HintKind::OnRemoteNetwork, HintKind::RoutableTo])
    );
    assert!(a
        .topology_hints()
        .iter()
        .all(|h| h.related_ifname.as_deref() == Some("ens3")));
}

/// Replies never solicit back, so two hosts settle after one exchange.
#[test]
fn exchange_settles() {
    let t0 = Instant::now();
    let (mut a, a_log) = node();
    let (mut b, b_log) = node();
    a.update_interfaces(inventory(vec![eth("eth0", 2, 0xa, &[])]), t0);
    b.update_interfaces(inventory(vec![eth("ens3", 2, 0xb, &[])]), t0);

    let mut now = t0;
    for _ in 0..10 {
        a.fire_due(now);
        b.fire_due(now);
        let from_a = a_log.ops();
        let from_b = b_log.ops();
        a_log.clear();
        b_log.clear();
        for op in &from_a {
            if let Some(obs) = delivered(op, addr(HOST_A), addr(HOST_B), "ens3") {
                b.beacon_received(&obs, now);
            }
        }
        for op in &from_b {
            if let Some(obs) = delivered(op, addr(HOST_B), addr(HOST_A), "eth0") {
                a.beacon_received(&obs, now);
            }
        }
        now += Duration::from_secs(5);
    }

    assert_eq!(a.next_deadline(), None);
    assert_eq!(b.next_deadline(), None);
    // One solicitation round and one advertisement round each.
    assert_eq!(a.stats().multicast_rounds, 2);
    assert_eq!(b.stats().multicast_rounds, 2);
}

// ── Spawned engines ───────────────────────────────────────────────────────────

fn wired() -> (MemoryTransport, mpsc::UnboundedReceiver<TransportOp>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut transport = MemoryTransport::new();
    transport.on_deliver(move |op| {
        let _ = tx.send(op.clone());
    });
    (transport, rx)
}

async fn forward(
    mut ops: mpsc::UnboundedReceiver<TransportOp>,
    sender: SocketAddr,
    peer: SocketAddr,
    ifname: &'static str,
    to: EngineHandle,
) {
    while let Some(op) = ops.recv().await {
        if let Some(obs) = delivered(&op, sender, peer, ifname) {
            if to.observe(obs).await.is_err() {
                return;
            }
        }
    }
}

async fn hints_with(handle: &EngineHandle, kind: HintKind) -> BTreeSet<TopologyHint> {
    for _ in 0..200 {
        let hints = handle.topology_hints().await.unwrap();
        if hints.iter().any(|h| h.hint == kind) {
            return hints;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no {kind} hint within 2s");
}

#[tokio::test]
async fn spawned_engines_discover_each_other() {
    let settings = EngineSettings {
        min_broadcast_interval: Duration::from_millis(20),
        ..EngineSettings::default()
    };
    let (shutdown_tx, _) = broadcast::channel(1);

    let (a_transport, a_ops) = wired();
    let (b_transport, b_ops) = wired();
    let (a, a_task) = engine::spawn(
        BeaconingEngine::new(settings.clone(), a_transport),
        shutdown_tx.subscribe(),
    );
    let (b, b_task) = engine::spawn(
        BeaconingEngine::new(settings, b_transport),
        shutdown_tx.subscribe(),
    );
    tokio::spawn(forward(a_ops, addr(HOST_A), addr(HOST_B), "ens3", b.clone()));
    tokio::spawn(forward(b_ops, addr(HOST_B), addr(HOST_A), "eth0", a.clone()));

    // B first, so it knows its interface before A's solicitation lands.
    b.update_interfaces(inventory(vec![eth("ens3", 2, 0xb, &[])]))
        .await
        .unwrap();
    a.update_interfaces(inventory(vec![eth("eth0", 2, 0xa, &[])]))
        .await
        .unwrap();

    let at_a = hints_with(&a, HintKind::RoutableTo).await;
    assert!(at_a
        .iter()
        .all(|h| h.related_mac.as_deref() == Some("52:54:00:00:0b:02")));
    let at_b = hints_with(&b, HintKind::OnRemoteNetwork).await;
    assert!(at_b.iter().all(|h| h.ifname.as_deref() == Some("ens3")));

    shutdown_tx.send(()).unwrap();
    a_task.await.unwrap();
    b_task.await.unwrap();
    assert!(a.status().await.is_err());
}
