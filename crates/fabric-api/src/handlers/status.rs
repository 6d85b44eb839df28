//! /status and /daemon/shutdown handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use fabric_services::EngineStatus;

use super::{engine_unavailable, ApiState};

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub engine: EngineStatus,
}

pub async fn handle_status(
    State(state): State<ApiState>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let engine = state.engine.status().await.map_err(engine_unavailable)?;
    Ok(Json(StatusResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        engine,
    }))
}

// ── /daemon/shutdown ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());

    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
