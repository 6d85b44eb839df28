//! Configuration system for fabric.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FABRIC_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/fabric/config.toml
//!   3. ~/.config/fabric/config.toml

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wire::{BEACON_IPV4_MULTICAST, BEACON_IPV6_MULTICAST, BEACON_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub network: NetworkConfig,
    pub beaconing: BeaconingConfig,
    pub observer: ObserverConfig,
    pub api: ApiConfig,
}

/// Where the engine takes its beacon observations from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiveMode {
    /// Datagrams read from the engine's own multicast socket.
    Socket,
    /// JSON lines from per-interface observer processes. The socket stays
    /// bound (so senders get no ICMP port-unreachable) but is not read from.
    Observer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port beacons are sent to and received on.
    pub port: u16,
    pub ipv4_group: Ipv4Addr,
    pub ipv6_group: Ipv6Addr,
    /// Deliver our own multicast back to us. Useful on a single test host.
    pub loopback: bool,
    pub receive_mode: ReceiveMode,
    /// Interfaces to beacon on. Empty = every non-loopback interface.
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconingConfig {
    /// Minimum time between two multicast rounds.
    pub min_broadcast_interval_secs: f64,
    /// Beacon state older (or newer) than this, by UUID time, is forgotten.
    pub aging_window_secs: f64,
    /// Queue a solicitation round when interfaces are added.
    pub solicit_on_interface_change: bool,
    /// Periodic solicitation. 0 = only on interface changes.
    pub solicit_interval_secs: u64,
    /// How often the interface inventory is re-read.
    pub rescan_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Command spawned per interface. The interface name is appended.
    pub command: Vec<String>,
    /// Delay before restarting an observer that exited.
    pub restart_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    /// Local HTTP port (bound on 127.0.0.1).
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: BEACON_PORT,
            ipv4_group: BEACON_IPV4_MULTICAST,
            ipv6_group: BEACON_IPV6_MULTICAST,
            loopback: false,
            receive_mode: ReceiveMode::Observer,
            interfaces: Vec::new(),
        }
    }
}

impl Default for BeaconingConfig {
    fn default() -> Self {
        Self {
            min_broadcast_interval_secs: DEFAULT_MIN_BROADCAST_INTERVAL_SECS,
            aging_window_secs: DEFAULT_AGING_WINDOW_SECS,
            solicit_on_interface_change: true,
            solicit_interval_secs: 0,
            rescan_interval_secs: 30,
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            command: vec!["observe-beacons".to_string()],
            restart_interval_secs: 60,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 5248,
        }
    }
}

const DEFAULT_MIN_BROADCAST_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_AGING_WINDOW_SECS: f64 = 120.0;

impl BeaconingConfig {
    pub fn min_broadcast_interval(&self) -> Duration {
        secs_or(self.min_broadcast_interval_secs, DEFAULT_MIN_BROADCAST_INTERVAL_SECS)
    }

    pub fn aging_window(&self) -> Duration {
        secs_or(self.aging_window_secs, DEFAULT_AGING_WINDOW_SECS)
    }
}

/// Negative values clamp to zero. Values no `Duration` can hold fall back
/// to `default`.
fn secs_or(secs: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0))
        .unwrap_or_else(|_| Duration::from_secs_f64(default))
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("fabric")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FabricConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            FabricConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FABRIC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&FabricConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply FABRIC_* overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let flag = |v: &str| v == "true" || v == "1";

        if let Some(v) = lookup("FABRIC_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Some(v) = lookup("FABRIC_NETWORK__LOOPBACK") {
            self.network.loopback = flag(&v);
        }
        if let Some(v) = lookup("FABRIC_NETWORK__RECEIVE_MODE") {
            match v.as_str() {
                "socket" => self.network.receive_mode = ReceiveMode::Socket,
                "observer" => self.network.receive_mode = ReceiveMode::Observer,
                _ => {}
            }
        }
        if let Some(v) = lookup("FABRIC_NETWORK__INTERFACES") {
            self.network.interfaces = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("FABRIC_BEACONING__MIN_BROADCAST_INTERVAL_SECS") {
            if let Ok(s) = v.parse() {
                self.beaconing.min_broadcast_interval_secs = s;
            }
        }
        if let Some(v) = lookup("FABRIC_BEACONING__AGING_WINDOW_SECS") {
            if let Ok(s) = v.parse() {
                self.beaconing.aging_window_secs = s;
            }
        }
        if let Some(v) = lookup("FABRIC_API__ENABLED") {
            self.api.enabled = flag(&v);
        }
        if let Some(v) = lookup("FABRIC_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
    }
}
