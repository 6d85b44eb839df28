//! Shared types, wire format, and configuration for the fabric crates.
//! All other fabric crates depend on this one.

pub mod config;
pub mod hint;
pub mod interface;
pub mod wire;

pub use hint::{HintKind, TopologyHint};
pub use interface::{InterfaceInfo, Interfaces, Link};
pub use wire::{BeaconData, BeaconPayload, BeaconRemote, BeaconType, WireError};
