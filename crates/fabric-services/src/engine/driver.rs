//! Single-owner event loop around a `BeaconingEngine`.
//!
//! One task owns the engine. Everything else talks to it through an
//! `EngineHandle`: inputs go in as `EngineEvent`s over an mpsc channel,
//! queries come back over oneshot channels. The only timer is the pending
//! multicast round's deadline.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use fabric_core::hint::TopologyHint;
use fabric_core::interface::Interfaces;
use fabric_core::wire::BeaconType;

use super::{BeaconingEngine, EngineStatus};
use crate::observation::Observation;
use crate::transport::Transport;

const EVENT_QUEUE: usize = 1024;

/// Largest datagram the receive loop reads.
const MAX_DATAGRAM: usize = 65_535;

/// Pause after a failed read before trying the socket again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub enum EngineEvent {
    Datagram { bytes: Vec<u8>, from: SocketAddr },
    Observed(Observation),
    UpdateInterfaces(Interfaces),
    RequestBroadcast(BeaconType),
    TopologyHints(oneshot::Sender<BTreeSet<TopologyHint>>),
    Status(oneshot::Sender<EngineStatus>),
    Stop(oneshot::Sender<()>),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("beaconing engine is not running")]
    Closed,
}

/// Clonable sender side of the engine's event channel.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    async fn send(&self, event: EngineEvent) -> Result<(), EngineError> {
        self.tx.send(event).await.map_err(|_| EngineError::Closed)
    }

    async fn query<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> EngineEvent,
    ) -> Result<R, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| EngineError::Closed)
    }

    pub async fn observe(&self, observation: Observation) -> Result<(), EngineError> {
        self.send(EngineEvent::Observed(observation)).await
    }

    pub async fn datagram(&self, bytes: Vec<u8>, from: SocketAddr) -> Result<(), EngineError> {
        self.send(EngineEvent::Datagram { bytes, from }).await
    }

    pub async fn update_interfaces(&self, interfaces: Interfaces) -> Result<(), EngineError> {
        self.send(EngineEvent::UpdateInterfaces(interfaces)).await
    }

    pub async fn request_broadcast(&self, kind: BeaconType) -> Result<(), EngineError> {
        self.send(EngineEvent::RequestBroadcast(kind)).await
    }

    pub async fn topology_hints(&self) -> Result<BTreeSet<TopologyHint>, EngineError> {
        self.query(EngineEvent::TopologyHints).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.query(EngineEvent::Status).await
    }

    /// Stop the engine and wait until it has released its socket.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.query(EngineEvent::Stop).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the engine task has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// An engine handle and the receiving end it talks to.
pub fn channel() -> (EngineHandle, mpsc::Receiver<EngineEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    (EngineHandle { tx }, rx)
}

/// Spawn the engine on its own task.
pub fn spawn<T: Transport + 'static>(
    engine: BeaconingEngine<T>,
    shutdown: broadcast::Receiver<()>,
) -> (EngineHandle, JoinHandle<()>) {
    let (handle, events) = channel();
    let task = tokio::spawn(run(engine, events, shutdown));
    (handle, task)
}

/// Drive `engine` until it is stopped, shut down, or every handle is gone.
pub async fn run<T: Transport>(
    mut engine: BeaconingEngine<T>,
    mut events: mpsc::Receiver<EngineEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!("beaconing engine running");
    loop {
        let deadline = engine.next_deadline();
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                tracing::info!("beaconing engine shutting down");
                engine.stop();
                return;
            }

            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("all engine handles dropped, stopping");
                    engine.stop();
                    return;
                };
                if !dispatch(&mut engine, event) {
                    return;
                }
            }

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                engine.fire_due(Instant::now());
            }
        }
    }
}

/// Apply one event. Returns false once the engine has been stopped.
fn dispatch<T: Transport>(engine: &mut BeaconingEngine<T>, event: EngineEvent) -> bool {
    let now = Instant::now();
    match event {
        EngineEvent::Datagram { bytes, from } => {
            engine.datagram_received(&bytes, from, now);
        }
        EngineEvent::Observed(observation) => {
            engine.beacon_received(&observation, now);
        }
        EngineEvent::UpdateInterfaces(interfaces) => {
            engine.update_interfaces(interfaces, now);
        }
        EngineEvent::RequestBroadcast(kind) => {
            engine.request_broadcast(kind, now);
        }
        EngineEvent::TopologyHints(reply) => {
            let _ = reply.send(engine.topology_hints());
        }
        EngineEvent::Status(reply) => {
            let _ = reply.send(engine.status(now));
        }
        EngineEvent::Stop(done) => {
            engine.stop();
            let _ = done.send(());
            return false;
        }
    }
    true
}

/// Forward every datagram read from `socket` to the engine.
///
/// Ends on shutdown or when the engine is gone, dropping the socket.
pub async fn receive_loop(
    socket: UdpSocket,
    handle: EngineHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    tracing::info!("beacon receiver starting");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("beacon receiver shutting down");
                return;
            }

            _ = handle.closed() => {
                tracing::info!("engine gone, beacon receiver exiting");
                return;
            }

            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    if handle.datagram(buf[..len].to_vec(), from).await.is_err() {
                        tracing::info!("engine gone, beacon receiver exiting");
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "recv_from failed");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            },
        }
    }
}
