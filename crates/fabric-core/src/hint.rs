//! Topology hints, the facts beaconing produces.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a hint says about the relationship between two interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintKind {
    /// Both local interfaces saw the same beacon: same broadcast domain.
    SameLocalFabricAs,
    /// A remote interface was heard via multicast: on-link neighbour.
    OnRemoteNetwork,
    /// A remote interface was heard via unicast only: L3 reachability.
    RoutableTo,
    /// Our beacon came back on the interface that sent it. A fault: loop,
    /// storm, or reflection.
    RxOwnBeaconOnTxInterface,
    /// Our beacon came back on another local interface: the two are bridged.
    RxOwnBeaconOnOtherInterface,
}

impl HintKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HintKind::SameLocalFabricAs => "same_local_fabric_as",
            HintKind::OnRemoteNetwork => "on_remote_network",
            HintKind::RoutableTo => "routable_to",
            HintKind::RxOwnBeaconOnTxInterface => "rx_own_beacon_on_tx_interface",
            HintKind::RxOwnBeaconOnOtherInterface => "rx_own_beacon_on_other_interface",
        }
    }

    /// Hints that indicate a misconfiguration rather than topology.
    pub fn is_fault(self) -> bool {
        matches!(self, HintKind::RxOwnBeaconOnTxInterface)
    }
}

impl fmt::Display for HintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed fact: `(ifname, vid)` has relationship `hint` with the
/// related interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopologyHint {
    pub ifname: Option<String>,
    pub vid: Option<u16>,
    pub hint: HintKind,
    pub related_ifname: Option<String>,
    pub related_vid: Option<u16>,
    pub related_mac: Option<String>,
}

impl TopologyHint {
    pub fn new(
        ifname: Option<String>,
        vid: Option<u16>,
        hint: HintKind,
        related_ifname: Option<String>,
        related_vid: Option<u16>,
        related_mac: Option<String>,
    ) -> Self {
        Self {
            ifname,
            vid,
            hint,
            related_ifname,
            related_vid,
            related_mac,
        }
    }

    /// The same relationship seen from the related side, without a MAC.
    pub fn reversed(&self) -> Self {
        Self {
            ifname: self.related_ifname.clone(),
            vid: self.related_vid,
            hint: self.hint,
            related_ifname: self.ifname.clone(),
            related_vid: self.vid,
            related_mac: None,
        }
    }
}

impl fmt::Display for TopologyHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn side(name: &Option<String>, vid: Option<u16>) -> String {
            let name = name.as_deref().unwrap_or("?");
            match vid {
                Some(v) => format!("{name}.{v}"),
                None => name.to_string(),
            }
        }
        write!(
            f,
            "{} {} {}",
            side(&self.ifname, self.vid),
            self.hint,
            side(&self.related_ifname, self.related_vid)
        )?;
        if let Some(mac) = &self.related_mac {
            write!(f, " ({mac})")?;
        }
        Ok(())
    }
}
