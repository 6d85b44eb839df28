//! Topology inference: one received beacon in, a set of hints out.
//!
//! Pure functions over the engine's view of a single UUID. The engine does
//! the bookkeeping (aging, duplicate tracking, storing); this module only
//! decides what the observation means.
//!
//! Rules:
//!   own beacon:  we sent this UUID. Heard on the sending interface is a
//!                fault; heard on another interface means the two share a
//!                fabric.
//!   duplicate:   a foreign UUID heard on several local (ifname, vid)
//!                pairs. Every pair gets same_local_fabric_as, both ways.
//!   remote:      a foreign beacon naming its sender. Multicast means an
//!                on-link neighbour, unicast only proves routability.

use std::collections::BTreeSet;

use fabric_core::hint::{HintKind, TopologyHint};
use fabric_core::wire::BeaconPayload;

use crate::observation::ReceivedBeacon;

/// Hints implied by `rx`.
///
/// `sent` is our own transmission with the same UUID, if any. `receipts`
/// is every live receipt of that UUID, `rx` included.
pub fn infer_hints(
    rx: &ReceivedBeacon,
    sent: Option<&BeaconPayload>,
    receipts: &[ReceivedBeacon],
) -> BTreeSet<TopologyHint> {
    let mut hints = BTreeSet::new();
    match sent {
        Some(sent) => own_beacon_hints(rx, sent, &mut hints),
        None => {
            duplicate_hints(receipts, &mut hints);
            remote_hints(rx, &mut hints);
        }
    }
    hints
}

fn own_beacon_hints(rx: &ReceivedBeacon, sent: &BeaconPayload, hints: &mut BTreeSet<TopologyHint>) {
    let Some(rx_ifname) = rx.ifname.as_deref() else {
        return;
    };
    let Some(tx) = sent.remote().filter(|r| !r.name.is_empty()) else {
        return;
    };

    let kind = if rx_ifname == tx.name {
        HintKind::RxOwnBeaconOnTxInterface
    } else {
        HintKind::RxOwnBeaconOnOtherInterface
    };
    hints.insert(TopologyHint::new(
        Some(rx_ifname.to_string()),
        rx.vid,
        kind,
        Some(tx.name.clone()),
        tx.vid,
        tx.mac_address.clone(),
    ));
}

fn duplicate_hints(receipts: &[ReceivedBeacon], hints: &mut BTreeSet<TopologyHint>) {
    let mut sides: Vec<(&str, Option<u16>)> = Vec::new();
    for receipt in receipts {
        if let (Some(name), vid) = receipt.fabric_key() {
            if !sides.contains(&(name, vid)) {
                sides.push((name, vid));
            }
        }
    }

    for (i, &(a_name, a_vid)) in sides.iter().enumerate() {
        for &(b_name, b_vid) in &sides[i + 1..] {
            let hint = TopologyHint::new(
                Some(a_name.to_string()),
                a_vid,
                HintKind::SameLocalFabricAs,
                Some(b_name.to_string()),
                b_vid,
                None,
            );
            hints.insert(hint.reversed());
            hints.insert(hint);
        }
    }
}

fn remote_hints(rx: &ReceivedBeacon, hints: &mut BTreeSet<TopologyHint>) {
    let Some(remote) = rx.beacon.remote() else {
        return;
    };
    if remote.name.is_empty() || remote.mac_address.is_none() {
        return;
    }
    let kind = match rx.multicast {
        Some(true) => HintKind::OnRemoteNetwork,
        Some(false) => HintKind::RoutableTo,
        None => return,
    };
    hints.insert(TopologyHint::new(
        rx.ifname.clone(),
        rx.vid,
        kind,
        Some(remote.name.clone()),
        remote.vid,
        remote.mac_address.clone(),
    ));
}
