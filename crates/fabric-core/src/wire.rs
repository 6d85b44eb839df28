//! Beacon wire format: the bytes exchanged between beaconing engines.
//!
//! Every beacon is a 4-byte header followed by a JSON body:
//!
//! ```text
//!   0        1        2                 4
//!   +--------+--------+-----------------+----------------------+
//!   | version| type   | length (u16 BE) | body (length bytes)  |
//!   +--------+--------+-----------------+----------------------+
//! ```
//!
//! The body carries the beacon UUID, the type code (repeated so a body
//! cannot be replayed under a different header), and the typed payload.
//! A receiver seeing anything it does not understand drops the packet.
//!
//! Beacon UUIDs are time-based (version 1). The embedded creation time is
//! the clock the aging queues run on, so no separate "sent at" field exists.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::{Builder, Uuid, Variant, Version};

// ── Constants ─────────────────────────────────────────────────────────────────

/// UDP port every engine binds and sends beacons to.
pub const BEACON_PORT: u16 = 5240;

/// Link-local IPv4 group beacons are multicast to.
pub const BEACON_IPV4_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 118);

/// Link-local IPv6 group beacons are multicast to.
pub const BEACON_IPV6_MULTICAST: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x15a);

/// Current protocol version. Anything else is dropped on decode.
pub const BEACON_VERSION: u8 = 1;

/// Fixed header size: version, type, length.
pub const BEACON_HEADER_LEN: usize = 4;

/// 100ns ticks between the Gregorian epoch (1582-10-15) and the UNIX epoch.
const UUID_TICKS_BETWEEN_EPOCHS: u64 = 0x01B2_1DD2_1381_4000;

/// Largest tick count a version-1 UUID can hold (60 bits).
const UUID_MAX_TICKS: u64 = (1 << 60) - 1;

// ── Beacon type ───────────────────────────────────────────────────────────────

/// What a beacon asks of its receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum BeaconType {
    /// Requests a unicast advertisement in reply.
    Solicitation = 1,
    /// A reply to a solicitation, or an unsolicited announcement.
    Advertisement = 2,
}

impl BeaconType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BeaconType::Solicitation => "solicitation",
            BeaconType::Advertisement => "advertisement",
        }
    }
}

impl TryFrom<u8> for BeaconType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BeaconType::Solicitation),
            2 => Ok(BeaconType::Advertisement),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl fmt::Display for BeaconType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Payload ───────────────────────────────────────────────────────────────────

/// Reduced description of the interface a beacon was sent from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconRemote {
    /// Interface name on the sending machine, e.g. "eth0".
    #[serde(default)]
    pub name: String,

    /// MAC address as lowercase colon-separated hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    /// 802.1Q VLAN the beacon was sent on. None = untagged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,

    /// Link the beacon was sourced from, as "address/prefix".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,

    /// Carrier state of the sending interface, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_connected: Option<bool>,
}

/// Application payload carried inside a beacon.
///
/// `remote` and `acks` are the fields the protocol itself understands.
/// Anything else a newer sender includes is kept in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeaconData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<BeaconRemote>,

    /// UUID of the solicitation an advertisement answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acks: Option<Uuid>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BeaconData {
    pub fn with_remote(remote: BeaconRemote) -> Self {
        Self {
            remote: Some(remote),
            ..Self::default()
        }
    }
}

/// A decoded (or freshly created) beacon. Immutable once constructed.
///
/// The serde form of this struct is also the shape external observer
/// processes report under their `payload` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconPayload {
    pub uuid: Uuid,

    #[serde(default = "default_version")]
    pub version: u8,

    #[serde(rename = "type")]
    pub kind: BeaconType,

    #[serde(default)]
    pub payload: BeaconData,
}

fn default_version() -> u8 {
    BEACON_VERSION
}

/// JSON body as it appears on the wire, after the header.
#[derive(Serialize, Deserialize)]
struct WireBody {
    uuid: Uuid,
    #[serde(rename = "type")]
    type_code: u8,
    #[serde(flatten)]
    data: BeaconData,
}

impl BeaconPayload {
    /// Build a beacon with a fresh time-based UUID and the current version.
    pub fn new(kind: BeaconType, payload: BeaconData) -> Self {
        Self {
            uuid: new_beacon_uuid(),
            version: BEACON_VERSION,
            kind,
            payload,
        }
    }

    /// Build a beacon and serialize it in one step.
    pub fn create(kind: BeaconType, payload: BeaconData) -> Result<(Self, Vec<u8>), WireError> {
        let beacon = Self::new(kind, payload);
        let bytes = beacon.encode()?;
        Ok((beacon, bytes))
    }

    /// Serialize to header + body.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let body = serde_json::to_vec(&WireBody {
            uuid: self.uuid,
            type_code: self.kind.code(),
            data: self.payload.clone(),
        })
        .map_err(WireError::Malformed)?;

        let length = u16::try_from(body.len()).map_err(|_| WireError::TooLarge(body.len()))?;

        let mut buf = Vec::with_capacity(BEACON_HEADER_LEN + body.len());
        buf.push(self.version);
        buf.push(self.kind.code());
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Parse a received datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < BEACON_HEADER_LEN {
            return Err(WireError::TooShort(bytes.len()));
        }
        let version = bytes[0];
        let type_code = bytes[1];
        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

        let body = &bytes[BEACON_HEADER_LEN..];
        if body.len() < length {
            return Err(WireError::Truncated {
                expected: length,
                got: body.len(),
            });
        }
        if version != BEACON_VERSION {
            return Err(WireError::UnknownVersion(version));
        }
        let kind = BeaconType::try_from(type_code)?;

        let wire: WireBody = serde_json::from_slice(&body[..length]).map_err(WireError::Malformed)?;
        if wire.type_code != type_code {
            return Err(WireError::TypeMismatch {
                header: type_code,
                body: wire.type_code,
            });
        }
        if uuid_timestamp(&wire.uuid).is_none() {
            return Err(WireError::NotTimeBased(wire.uuid));
        }

        Ok(Self {
            uuid: wire.uuid,
            version,
            kind,
            payload: wire.data,
        })
    }

    /// UNIX creation time recovered from the UUID.
    pub fn timestamp(&self) -> Option<f64> {
        uuid_timestamp(&self.uuid)
    }

    pub fn remote(&self) -> Option<&BeaconRemote> {
        self.payload.remote.as_ref()
    }
}

// ── UUIDs ─────────────────────────────────────────────────────────────────────

/// Per-process node id for version-1 UUIDs.
///
/// Random, with the multicast bit set so it can never collide with a real
/// interface MAC (RFC 4122 §4.5).
fn node_id() -> &'static [u8; 6] {
    static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();
    NODE_ID.get_or_init(|| {
        let mut id: [u8; 6] = rand::random();
        id[0] |= 0x01;
        id
    })
}

/// Generate a time-based UUID for a new beacon.
pub fn new_beacon_uuid() -> Uuid {
    Uuid::now_v1(node_id())
}

/// Build a version-1 UUID whose embedded timestamp is `unix_secs`.
///
/// Out-of-range times are clamped to what 60 bits of ticks can express.
pub fn beacon_uuid_at(unix_secs: f64) -> Uuid {
    let ticks = unix_secs * 10_000_000.0 + UUID_TICKS_BETWEEN_EPOCHS as f64;
    let ticks = ticks.clamp(0.0, UUID_MAX_TICKS as f64) as u64;

    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&(ticks as u32).to_be_bytes());
    bytes[4..6].copy_from_slice(&((ticks >> 32) as u16).to_be_bytes());
    bytes[6..8].copy_from_slice(&(((ticks >> 48) as u16) & 0x0fff).to_be_bytes());
    bytes[8..10].copy_from_slice(&rand::random::<u16>().to_be_bytes());
    bytes[10..16].copy_from_slice(node_id());

    Builder::from_bytes(bytes)
        .with_variant(Variant::RFC4122)
        .with_version(Version::Mac)
        .into_uuid()
}

/// UNIX time (seconds) embedded in a version-1 UUID. None for other versions.
pub fn uuid_timestamp(uuid: &Uuid) -> Option<f64> {
    if uuid.get_version_num() != 1 {
        return None;
    }
    let b = uuid.as_bytes();
    let time_low = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64;
    let time_mid = u16::from_be_bytes([b[4], b[5]]) as u64;
    let time_hi = (u16::from_be_bytes([b[6], b[7]]) & 0x0fff) as u64;
    let ticks = (time_hi << 48) | (time_mid << 32) | time_low;
    Some((ticks as f64 - UUID_TICKS_BETWEEN_EPOCHS as f64) / 10_000_000.0)
}

/// Current UNIX time in seconds, as the aging logic compares it.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("beacon packet must be at least 4 bytes, got {0}")]
    TooShort(usize),
    #[error("truncated beacon payload: expected {expected} bytes, got {got} bytes")]
    Truncated { expected: usize, got: usize },
    #[error("unknown beacon version: {0}")]
    UnknownVersion(u8),
    #[error("unknown beacon type code: {0}")]
    UnknownType(u8),
    #[error("beacon type mismatch: header says {header}, body says {body}")]
    TypeMismatch { header: u8, body: u8 },
    #[error("beacon body is not valid: {0}")]
    Malformed(serde_json::Error),
    #[error("beacon uuid {0} is not time-based")]
    NotTimeBased(Uuid),
    #[error("beacon body too large to encode: {0} bytes")]
    TooLarge(usize),
}
