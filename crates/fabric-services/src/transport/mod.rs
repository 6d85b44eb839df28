//! Multicast transport.
//!
//! `Transport` is the seam between the engine and the network. `UdpTransport`
//! is the real socket; `MemoryTransport` records what would have been sent.
//! `MembershipSet` tracks which group memberships are held so that an
//! interface change only joins (and leaves) what actually changed.

mod memory;
mod udp;

pub use memory::{MemoryTransport, TransportLog, TransportOp};
pub use udp::UdpTransport;

use std::collections::BTreeSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use fabric_core::interface::{enabled_interfaces, Interfaces};

/// One multicast group membership. The group itself is fixed per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Membership {
    /// IPv4 group, selected by a local interface address.
    V4 { interface: Ipv4Addr },
    /// IPv6 group, selected by interface index.
    V6 { index: u32 },
}

/// Outgoing interface for a multicast send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MulticastSource {
    V4(Ipv4Addr),
    V6(u32),
}

pub trait Transport: Send {
    fn join_group(&mut self, membership: &Membership) -> io::Result<()>;

    fn leave_group(&mut self, membership: &Membership) -> io::Result<()>;

    fn send_multicast(&mut self, source: &MulticastSource, bytes: &[u8]) -> io::Result<usize>;

    fn send_unicast(&mut self, dest: SocketAddr, bytes: &[u8]) -> io::Result<usize>;

    /// Close the transport. Calling it again is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport is closed")
}

// ── Memberships ───────────────────────────────────────────────────────────────

/// What changed in one `MembershipSet::reconcile` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub joined: Vec<Membership>,
    pub left: Vec<Membership>,
    pub failed: Vec<Membership>,
}

/// Memberships currently held on a transport.
#[derive(Debug, Default)]
pub struct MembershipSet {
    held: BTreeSet<Membership>,
}

impl MembershipSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memberships the given interfaces call for: the IPv6 group on every
    /// enabled interface's index, and the IPv4 group on its first IPv4
    /// address.
    pub fn desired(interfaces: &Interfaces) -> BTreeSet<Membership> {
        let mut desired = BTreeSet::new();
        for info in enabled_interfaces(interfaces) {
            if info.index != 0 {
                desired.insert(Membership::V6 { index: info.index });
            }
            if let Some(addr) = info.first_ipv4() {
                desired.insert(Membership::V4 { interface: addr });
            }
        }
        desired
    }

    /// Join what is newly desired, leave what no longer is.
    ///
    /// "Address in use" on join means the kernel already has the
    /// membership; it is recorded as held. Other join failures are logged
    /// and retried on the next reconcile.
    pub fn reconcile<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        interfaces: &Interfaces,
    ) -> JoinReport {
        let desired = Self::desired(interfaces);
        let mut report = JoinReport::default();

        let stale: Vec<Membership> = self.held.difference(&desired).copied().collect();
        for membership in stale {
            if let Err(e) = transport.leave_group(&membership) {
                tracing::debug!(?membership, error = %e, "leave group failed");
            }
            self.held.remove(&membership);
            report.left.push(membership);
        }

        let fresh: Vec<Membership> = desired.difference(&self.held).copied().collect();
        for membership in fresh {
            match transport.join_group(&membership) {
                Ok(()) => {
                    tracing::debug!(?membership, "joined beacon group");
                    self.held.insert(membership);
                    report.joined.push(membership);
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    tracing::debug!(?membership, "beacon group already joined");
                    self.held.insert(membership);
                    report.joined.push(membership);
                }
                Err(e) => {
                    tracing::warn!(?membership, error = %e, "failed to join beacon group");
                    report.failed.push(membership);
                }
            }
        }

        report
    }

    /// Leave every held membership.
    pub fn clear<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        for membership in std::mem::take(&mut self.held) {
            if let Err(e) = transport.leave_group(&membership) {
                tracing::debug!(?membership, error = %e, "leave group failed");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn contains(&self, membership: &Membership) -> bool {
        self.held.contains(membership)
    }
}
