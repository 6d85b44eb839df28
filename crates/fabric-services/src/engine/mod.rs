//! The beaconing engine.
//!
//! `BeaconingEngine` is plain synchronous state: interfaces, the three aging
//! queues, the round scheduler, group memberships, and the transport. It is
//! owned by exactly one task (see `driver`), which feeds it events one at a
//! time. Nothing here locks.

mod driver;

pub use driver::{channel, receive_loop, run, spawn, EngineError, EngineEvent, EngineHandle};

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use fabric_core::config::{FabricConfig, ReceiveMode};
use fabric_core::hint::TopologyHint;
use fabric_core::interface::{enabled_interfaces, Interfaces};
use fabric_core::wire::{unix_now, BeaconData, BeaconPayload, BeaconType};

use crate::aging::AgingQueue;
use crate::inference::infer_hints;
use crate::observation::{Observation, ReceivedBeacon};
use crate::scheduler::BroadcastScheduler;
use crate::transport::{JoinReport, MembershipSet, MulticastSource, Transport};

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub min_broadcast_interval: Duration,
    pub aging_window: Duration,
    pub solicit_on_interface_change: bool,
    pub receive_mode: ReceiveMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&FabricConfig::default())
    }
}

impl From<&FabricConfig> for EngineSettings {
    fn from(config: &FabricConfig) -> Self {
        Self {
            min_broadcast_interval: config.beaconing.min_broadcast_interval(),
            aging_window: config.beaconing.aging_window(),
            solicit_on_interface_change: config.beaconing.solicit_on_interface_change,
            receive_mode: config.network.receive_mode,
        }
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No enabled interfaces.
    Idle,
    Active,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStats {
    pub beacons_sent: u64,
    pub send_failures: u64,
    pub beacons_received: u64,
    pub beacons_rejected: u64,
    pub multicast_rounds: u64,
}

/// Snapshot for the API and CLI.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub stopped: bool,
    pub receive_mode: ReceiveMode,
    pub interfaces: Vec<String>,
    pub memberships: usize,
    pub tx_queued: usize,
    pub rx_queued: usize,
    pub hints: usize,
    pub pending_round: Option<BeaconType>,
    pub secs_since_round: Option<f64>,
    pub stats: EngineStats,
}

/// What processing one beacon did.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconOutcome {
    pub uuid: Uuid,
    pub own_beacon: bool,
    pub duplicate: bool,
    pub hints: BTreeSet<TopologyHint>,
    pub replied: bool,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct BeaconingEngine<T> {
    settings: EngineSettings,
    transport: T,
    interfaces: Interfaces,
    memberships: MembershipSet,
    tx_queue: AgingQueue<BeaconPayload>,
    rx_queue: AgingQueue<Vec<ReceivedBeacon>>,
    topology_hints: AgingQueue<BTreeSet<TopologyHint>>,
    scheduler: BroadcastScheduler,
    state: EngineState,
    stopped: bool,
    stats: EngineStats,
}

impl<T: Transport> BeaconingEngine<T> {
    pub fn new(settings: EngineSettings, transport: T) -> Self {
        let window = settings.aging_window;
        Self {
            scheduler: BroadcastScheduler::new(settings.min_broadcast_interval),
            settings,
            transport,
            interfaces: Interfaces::new(),
            memberships: MembershipSet::new(),
            tx_queue: AgingQueue::new(window),
            rx_queue: AgingQueue::new(window),
            topology_hints: AgingQueue::new(window),
            state: EngineState::Idle,
            stopped: false,
            stats: EngineStats::default(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn interfaces(&self) -> &Interfaces {
        &self.interfaces
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// When the pending multicast round is due, if one is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    // ── Interfaces ────────────────────────────────────────────────────────────

    /// Replace the interface inventory.
    ///
    /// Joins groups for new interfaces, leaves groups for removed ones, and
    /// requests a solicitation round when enabled interfaces were added.
    pub fn update_interfaces(&mut self, interfaces: Interfaces, now: Instant) -> JoinReport {
        if self.stopped {
            tracing::debug!("ignoring interface update on stopped engine");
            return JoinReport::default();
        }

        let added: Vec<String> = enabled_interfaces(&interfaces)
            .filter(|new| {
                !self
                    .interfaces
                    .get(&new.name)
                    .is_some_and(|old| old.enabled)
            })
            .map(|i| i.name.clone())
            .collect();

        self.interfaces = interfaces;
        let report = self.memberships.reconcile(&mut self.transport, &self.interfaces);

        let state = if enabled_interfaces(&self.interfaces).next().is_some() {
            EngineState::Active
        } else {
            EngineState::Idle
        };
        if state != self.state {
            tracing::info!(from = ?self.state, to = ?state, "beaconing state changed");
            self.state = state;
        }
        if self.state == EngineState::Idle {
            self.scheduler.cancel();
        }

        if !added.is_empty() {
            tracing::info!(added = ?added, joined = report.joined.len(), "interfaces added");
            if self.settings.solicit_on_interface_change {
                self.request_broadcast(BeaconType::Solicitation, now);
            }
        }
        report
    }

    // ── Receive path ──────────────────────────────────────────────────────────

    /// Process one observer report.
    ///
    /// Reports without a usable UUID are rejected before any state changes.
    pub fn beacon_received(&mut self, obs: &Observation, now: Instant) -> Option<BeaconOutcome> {
        if self.stopped {
            return None;
        }
        match ReceivedBeacon::from_observation(obs, &self.interfaces) {
            Ok(rx) => Some(self.process(rx, now)),
            Err(e) if e.is_correlation() => {
                self.stats.beacons_rejected += 1;
                tracing::warn!(
                    interface = obs.interface.as_deref().unwrap_or("?"),
                    error = %e,
                    "rejecting beacon observation"
                );
                None
            }
            Err(e) => {
                self.stats.beacons_rejected += 1;
                tracing::debug!(error = %e, "dropping undecodable beacon observation");
                None
            }
        }
    }

    /// Process one datagram read from the beacon socket.
    ///
    /// Ignored unless the engine receives from its socket.
    pub fn datagram_received(
        &mut self,
        bytes: &[u8],
        from: SocketAddr,
        now: Instant,
    ) -> Option<BeaconOutcome> {
        if self.stopped || self.settings.receive_mode != ReceiveMode::Socket {
            return None;
        }
        match BeaconPayload::decode(bytes) {
            Ok(beacon) => {
                let rx = ReceivedBeacon::from_datagram(beacon, from, &self.interfaces);
                Some(self.process(rx, now))
            }
            Err(e) => {
                self.stats.beacons_rejected += 1;
                tracing::debug!(%from, error = %e, "dropping invalid beacon");
                None
            }
        }
    }

    fn process(&mut self, rx: ReceivedBeacon, now: Instant) -> BeaconOutcome {
        let wall = unix_now();
        self.stats.beacons_received += 1;

        self.tx_queue.age_out(wall);
        self.topology_hints.age_out(wall);

        let sent = self.tx_queue.get(&rx.uuid).cloned();
        let own_beacon = sent.is_some();
        let duplicate = self
            .rx_queue
            .append_and_check_duplicate(rx.uuid, rx.clone(), wall);

        let receipts = self.rx_queue.get(&rx.uuid).map(Vec::as_slice).unwrap_or(&[]);
        let hints = infer_hints(&rx, sent.as_ref(), receipts);

        tracing::debug!(
            uuid = %rx.uuid,
            kind = %rx.beacon.kind,
            interface = rx.ifname.as_deref().unwrap_or("?"),
            vid = ?rx.vid,
            own_beacon,
            duplicate,
            hints = hints.len(),
            "beacon received"
        );
        for hint in hints.iter().filter(|h| h.hint.is_fault()) {
            tracing::warn!(%hint, "own beacon heard on its sending interface");
        }

        if !hints.is_empty() {
            self.topology_hints
                .get_or_insert_with(rx.uuid, BTreeSet::new)
                .extend(hints.iter().cloned());
        }

        let mut replied = false;
        if rx.beacon.kind == BeaconType::Solicitation && !own_beacon {
            replied = self.reply_to(&rx);
            self.request_broadcast(BeaconType::Advertisement, now);
        }

        BeaconOutcome {
            uuid: rx.uuid,
            own_beacon,
            duplicate,
            hints,
            replied,
        }
    }

    /// Unicast an advertisement acknowledging a solicitation.
    fn reply_to(&mut self, rx: &ReceivedBeacon) -> bool {
        let Some(dest) = rx.reply_address else {
            tracing::debug!(uuid = %rx.uuid, "solicitation has no reply address");
            return false;
        };
        let data = BeaconData {
            remote: rx.ifinfo.as_ref().map(|info| info.beacon_remote(rx.vid)),
            acks: Some(rx.uuid),
            ..BeaconData::default()
        };
        let reply = BeaconPayload::new(BeaconType::Advertisement, data);
        self.send_beacon(reply, Destination::Unicast(dest))
    }

    // ── Send path ─────────────────────────────────────────────────────────────

    /// Encode and send one beacon. Only successful sends are remembered.
    fn send_beacon(&mut self, beacon: BeaconPayload, dest: Destination) -> bool {
        if self.stopped {
            return false;
        }
        let bytes = match beacon.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(uuid = %beacon.uuid, error = %e, "failed to encode beacon");
                return false;
            }
        };
        let result = match dest {
            Destination::Unicast(addr) => self.transport.send_unicast(addr, &bytes),
            Destination::Multicast(source) => self.transport.send_multicast(&source, &bytes),
        };
        match result {
            Ok(_) => {
                tracing::trace!(uuid = %beacon.uuid, kind = %beacon.kind, ?dest, "beacon sent");
                self.stats.beacons_sent += 1;
                self.tx_queue.age_out(unix_now());
                self.tx_queue.remember(beacon.uuid, beacon);
                true
            }
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::warn!(uuid = %beacon.uuid, ?dest, error = %e, "beacon send failed");
                false
            }
        }
    }

    /// Ask for a multicast round. Requests coalesce; see `BroadcastScheduler`.
    pub fn request_broadcast(&mut self, kind: BeaconType, now: Instant) -> Option<Duration> {
        if self.stopped {
            return None;
        }
        let delay = self.scheduler.request(kind, now);
        if let Some(delay) = delay {
            tracing::debug!(%kind, delay_ms = delay.as_millis() as u64, "multicast round scheduled");
        }
        delay
    }

    /// Run the pending round if it is due. Returns how many beacons went out.
    pub fn fire_due(&mut self, now: Instant) -> Option<usize> {
        let kind = self.scheduler.take_due(now)?;
        Some(self.send_multicast_beacons(kind))
    }

    /// One multicast round over every enabled interface.
    ///
    /// An interface without addresses gets one untagged IPv6 beacon. One
    /// with addresses gets a beacon per address, stamped with that subnet,
    /// plus an untagged IPv6 beacon when none of its addresses is IPv6.
    pub fn send_multicast_beacons(&mut self, kind: BeaconType) -> usize {
        if self.stopped {
            return 0;
        }
        let mut plan: Vec<(MulticastSource, BeaconData)> = Vec::new();
        for info in enabled_interfaces(&self.interfaces) {
            let remote = info.beacon_remote(None);
            if info.links.is_empty() {
                plan.push((
                    MulticastSource::V6(info.index),
                    BeaconData::with_remote(remote),
                ));
                continue;
            }
            let mut saw_ipv6 = false;
            for link in &info.links {
                let mut stamped = remote.clone();
                stamped.subnet = Some(link.to_string());
                let source = match link.address {
                    std::net::IpAddr::V4(addr) => MulticastSource::V4(addr),
                    std::net::IpAddr::V6(_) => {
                        saw_ipv6 = true;
                        MulticastSource::V6(info.index)
                    }
                };
                plan.push((source, BeaconData::with_remote(stamped)));
            }
            if !saw_ipv6 {
                plan.push((
                    MulticastSource::V6(info.index),
                    BeaconData::with_remote(remote),
                ));
            }
        }

        let mut sent = 0;
        for (source, data) in plan {
            let beacon = BeaconPayload::new(kind, data);
            if self.send_beacon(beacon, Destination::Multicast(source)) {
                sent += 1;
            }
        }
        self.stats.multicast_rounds += 1;
        tracing::info!(%kind, sent, interfaces = self.interfaces.len(), "multicast round sent");
        sent
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Union of the hints for every live UUID.
    pub fn topology_hints(&mut self) -> BTreeSet<TopologyHint> {
        self.topology_hints.age_out(unix_now());
        self.topology_hints.values().flatten().cloned().collect()
    }

    pub fn status(&mut self, now: Instant) -> EngineStatus {
        let wall = unix_now();
        self.tx_queue.age_out(wall);
        self.rx_queue.age_out(wall);
        let hints = self.topology_hints().len();

        EngineStatus {
            state: self.state,
            stopped: self.stopped,
            receive_mode: self.settings.receive_mode,
            interfaces: enabled_interfaces(&self.interfaces)
                .map(|i| i.name.clone())
                .collect(),
            memberships: self.memberships.len(),
            tx_queued: self.tx_queue.len(),
            rx_queued: self.rx_queue.len(),
            hints,
            pending_round: self.scheduler.pending_kind(),
            secs_since_round: self
                .scheduler
                .last_round()
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
            stats: self.stats,
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Cancel the pending round, forget everything, leave all groups, and
    /// close the transport. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        if let Some(kind) = self.scheduler.cancel() {
            tracing::debug!(%kind, "cancelled pending multicast round");
        }
        self.memberships.clear(&mut self.transport);
        self.tx_queue.clear();
        self.rx_queue.clear();
        self.topology_hints.clear();
        self.interfaces.clear();
        self.transport.close();
        self.state = EngineState::Idle;
        self.stopped = true;
        tracing::info!("beaconing engine stopped");
    }
}

#[derive(Debug, Clone, Copy)]
enum Destination {
    Unicast(SocketAddr),
    Multicast(MulticastSource),
}
