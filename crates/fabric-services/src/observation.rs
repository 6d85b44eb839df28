//! Observed beacons, before and after correlation with local state.
//!
//! An `Observation` is what a packet observer (or the engine's own socket)
//! reports. A `ReceivedBeacon` is the same packet once its UUID has been
//! validated, its payload decoded, and its receiving interface resolved.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fabric_core::interface::{InterfaceInfo, Interfaces};
use fabric_core::wire::{uuid_timestamp, BeaconPayload};

/// One observed beacon packet.
///
/// Fields mirror the observer feed: one JSON object per line, with the
/// decoded beacon under `payload`. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Observation {
    pub source_ip: Option<IpAddr>,
    pub source_port: Option<u16>,
    pub destination_ip: Option<IpAddr>,
    /// Local interface the packet arrived on.
    pub interface: Option<String>,
    /// 802.1Q tag seen on the frame. None = untagged.
    pub vid: Option<u16>,
    pub source_mac: Option<String>,
    pub destination_mac: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl Observation {
    /// The beacon UUID, validated as time-based.
    pub fn beacon_uuid(&self) -> Result<Uuid, ObservationError> {
        let raw = self
            .payload
            .as_ref()
            .and_then(|p| p.get("uuid"))
            .ok_or(ObservationError::MissingUuid)?;
        let text = raw
            .as_str()
            .ok_or_else(|| ObservationError::InvalidUuid(raw.to_string()))?;
        let uuid =
            Uuid::parse_str(text).map_err(|_| ObservationError::InvalidUuid(text.to_string()))?;
        if uuid_timestamp(&uuid).is_none() {
            return Err(ObservationError::InvalidUuid(text.to_string()));
        }
        Ok(uuid)
    }

    /// Decode the typed beacon from `payload`.
    pub fn beacon(&self) -> Result<BeaconPayload, ObservationError> {
        let payload = self.payload.clone().ok_or(ObservationError::MissingUuid)?;
        serde_json::from_value(payload).map_err(ObservationError::Malformed)
    }

    /// Where a unicast reply would go.
    pub fn reply_address(&self) -> Option<SocketAddr> {
        match (self.source_ip, self.source_port) {
            (Some(ip), Some(port)) => Some(SocketAddr::new(ip, port)),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ObservationError {
    #[error("observation carries no beacon uuid")]
    MissingUuid,
    #[error("observation carries an unusable beacon uuid: {0}")]
    InvalidUuid(String),
    #[error("observation payload is not a beacon: {0}")]
    Malformed(serde_json::Error),
}

impl ObservationError {
    /// Errors that mean the packet cannot be correlated with anything.
    pub fn is_correlation(&self) -> bool {
        matches!(
            self,
            ObservationError::MissingUuid | ObservationError::InvalidUuid(_)
        )
    }
}

/// A beacon packet correlated with local interface state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedBeacon {
    pub uuid: Uuid,
    pub beacon: BeaconPayload,
    /// Local interface that received it, when known.
    pub ifname: Option<String>,
    pub ifinfo: Option<InterfaceInfo>,
    pub vid: Option<u16>,
    pub reply_address: Option<SocketAddr>,
    /// The destination address was a multicast group. None when the
    /// receive path cannot tell.
    pub multicast: Option<bool>,
}

impl ReceivedBeacon {
    /// Correlate an observer report. The UUID is checked before anything
    /// else so a packet without one is rejected untouched.
    pub fn from_observation(
        obs: &Observation,
        interfaces: &Interfaces,
    ) -> Result<Self, ObservationError> {
        let uuid = obs.beacon_uuid()?;
        let beacon = obs.beacon()?;

        let ifname = obs.interface.clone();
        let ifinfo = ifname.as_ref().and_then(|n| interfaces.get(n)).cloned();

        Ok(Self {
            uuid,
            beacon,
            ifname,
            ifinfo,
            vid: obs.vid,
            reply_address: obs.reply_address(),
            multicast: obs.destination_ip.map(|ip| ip.is_multicast()),
        })
    }

    /// Correlate a datagram read from the engine's own socket.
    ///
    /// The socket does not expose the destination address or VLAN tag, so
    /// `multicast` and `vid` are None. The receiving interface is only known
    /// for IPv6 sources that carry a scope id.
    pub fn from_datagram(beacon: BeaconPayload, from: SocketAddr, interfaces: &Interfaces) -> Self {
        let from = unmap_v4(from);
        let ifinfo = match from {
            SocketAddr::V6(v6) if v6.scope_id() != 0 => interfaces
                .values()
                .find(|info| info.index == v6.scope_id())
                .cloned(),
            _ => None,
        };

        Self {
            uuid: beacon.uuid,
            beacon,
            ifname: ifinfo.as_ref().map(|i| i.name.clone()),
            ifinfo,
            vid: None,
            reply_address: Some(from),
            multicast: None,
        }
    }

    /// The local side this receipt belongs to.
    pub fn fabric_key(&self) -> (Option<&str>, Option<u16>) {
        (self.ifname.as_deref(), self.vid)
    }
}

/// Turn `::ffff:a.b.c.d` back into a plain IPv4 socket address.
pub fn unmap_v4(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}
