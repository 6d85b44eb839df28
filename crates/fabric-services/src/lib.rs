//! The beaconing engine and everything it needs at runtime: aging queues,
//! topology inference, round scheduling, transports, and observer feeds.

pub mod aging;
pub mod engine;
pub mod inference;
pub mod observation;
pub mod observer;
pub mod scheduler;
pub mod transport;

pub use aging::AgingQueue;
pub use engine::{
    BeaconOutcome, BeaconingEngine, EngineError, EngineEvent, EngineHandle, EngineSettings,
    EngineState, EngineStats, EngineStatus,
};
pub use inference::infer_hints;
pub use observation::{Observation, ObservationError, ReceivedBeacon};
pub use observer::{parse_observation_line, ObserverProcess};
pub use scheduler::BroadcastScheduler;
pub use transport::{
    JoinReport, Membership, MembershipSet, MemoryTransport, MulticastSource, Transport,
    TransportLog, TransportOp, UdpTransport,
};
