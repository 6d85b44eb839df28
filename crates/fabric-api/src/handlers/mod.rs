//! HTTP API handlers: exposes beaconing engine state as JSON.

pub mod hints;
pub mod status;

use std::time::Instant;

use axum::http::StatusCode;

use fabric_services::{EngineError, EngineHandle};

#[derive(Clone)]
pub struct ApiState {
    pub engine: EngineHandle,
    /// Shutdown broadcast sender, signals graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(engine: EngineHandle, shutdown_tx: tokio::sync::broadcast::Sender<()>) -> Self {
        Self {
            engine,
            shutdown_tx,
            started_at: Instant::now(),
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn engine_unavailable(e: EngineError) -> (StatusCode, String) {
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

// Re-export handler functions for use in router setup.
pub use hints::{handle_advertise, handle_hints, handle_solicit};
pub use status::{handle_shutdown, handle_status};
