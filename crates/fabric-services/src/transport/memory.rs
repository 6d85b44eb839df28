//! In-process transport that records instead of sending.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use fabric_core::wire::BeaconPayload;

use super::{closed_error, Membership, MulticastSource, Transport};

/// One thing the engine asked the transport to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Join(Membership),
    Leave(Membership),
    Multicast {
        source: MulticastSource,
        bytes: Vec<u8>,
    },
    Unicast {
        dest: SocketAddr,
        bytes: Vec<u8>,
    },
}

impl TransportOp {
    /// The beacon carried by a send, decoded.
    pub fn beacon(&self) -> Option<BeaconPayload> {
        match self {
            TransportOp::Multicast { bytes, .. } | TransportOp::Unicast { bytes, .. } => {
                BeaconPayload::decode(bytes).ok()
            }
            _ => None,
        }
    }
}

/// Shared, clonable view of everything a `MemoryTransport` recorded.
#[derive(Debug, Clone, Default)]
pub struct TransportLog(Arc<Mutex<Vec<TransportOp>>>);

impl TransportLog {
    fn lock(&self) -> MutexGuard<'_, Vec<TransportOp>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, op: TransportOp) {
        self.lock().push(op);
    }

    pub fn ops(&self) -> Vec<TransportOp> {
        self.lock().clone()
    }

    pub fn joins(&self) -> Vec<Membership> {
        self.lock()
            .iter()
            .filter_map(|op| match op {
                TransportOp::Join(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    /// Multicast sends, decoded, with their source selector.
    pub fn multicasts(&self) -> Vec<(MulticastSource, BeaconPayload)> {
        self.lock()
            .iter()
            .filter_map(|op| match op {
                TransportOp::Multicast { source, bytes } => {
                    BeaconPayload::decode(bytes).ok().map(|b| (*source, b))
                }
                _ => None,
            })
            .collect()
    }

    /// Unicast sends, decoded, with their destination.
    pub fn unicasts(&self) -> Vec<(SocketAddr, BeaconPayload)> {
        self.lock()
            .iter()
            .filter_map(|op| match op {
                TransportOp::Unicast { dest, bytes } => {
                    BeaconPayload::decode(bytes).ok().map(|b| (*dest, b))
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

type DeliveryHook = Box<dyn FnMut(&TransportOp) + Send>;

/// Transport for tests and simulations.
pub struct MemoryTransport {
    log: TransportLog,
    open: bool,
    fail_sends: bool,
    join_error: Option<io::ErrorKind>,
    deliver: Option<DeliveryHook>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            log: TransportLog::default(),
            open: true,
            fail_sends: false,
            join_error: None,
            deliver: None,
        }
    }

    pub fn log(&self) -> TransportLog {
        self.log.clone()
    }

    /// Make every send fail until turned off again.
    pub fn fail_sends(&mut self, fail: bool) {
        self.fail_sends = fail;
    }

    /// Make every join fail with `kind`. None restores success.
    pub fn fail_joins_with(&mut self, kind: Option<io::ErrorKind>) {
        self.join_error = kind;
    }

    /// Called with every successful send, after it is logged.
    pub fn on_deliver(&mut self, hook: impl FnMut(&TransportOp) + Send + 'static) {
        self.deliver = Some(Box::new(hook));
    }

    fn send(&mut self, op: TransportOp, len: usize) -> io::Result<usize> {
        if !self.open {
            return Err(closed_error());
        }
        if self.fail_sends {
            return Err(io::Error::new(io::ErrorKind::Other, "send failure injected"));
        }
        self.log.push(op.clone());
        if let Some(hook) = self.deliver.as_mut() {
            hook(&op);
        }
        Ok(len)
    }
}

impl Transport for MemoryTransport {
    fn join_group(&mut self, membership: &Membership) -> io::Result<()> {
        if !self.open {
            return Err(closed_error());
        }
        if let Some(kind) = self.join_error {
            return Err(io::Error::new(kind, "join failure injected"));
        }
        self.log.push(TransportOp::Join(*membership));
        Ok(())
    }

    fn leave_group(&mut self, membership: &Membership) -> io::Result<()> {
        if !self.open {
            return Err(closed_error());
        }
        self.log.push(TransportOp::Leave(*membership));
        Ok(())
    }

    fn send_multicast(&mut self, source: &MulticastSource, bytes: &[u8]) -> io::Result<usize> {
        let op = TransportOp::Multicast {
            source: *source,
            bytes: bytes.to_vec(),
        };
        self.send(op, bytes.len())
    }

    fn send_unicast(&mut self, dest: SocketAddr, bytes: &[u8]) -> io::Result<usize> {
        let op = TransportOp::Unicast {
            dest,
            bytes: bytes.to_vec(),
        };
        self.send(op, bytes.len())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
