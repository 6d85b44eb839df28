//! /hints, /solicit and /advertise handlers.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use fabric_core::hint::TopologyHint;
use fabric_core::wire::BeaconType;

use super::{engine_unavailable, ApiState};

// ── /hints ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HintsResponse {
    pub hints: Vec<TopologyHint>,
    /// Hint count per kind, e.g. "same_local_fabric_as" → 4.
    pub counts: BTreeMap<String, usize>,
}

pub async fn handle_hints(
    State(state): State<ApiState>,
) -> Result<Json<HintsResponse>, (StatusCode, String)> {
    let hints = state
        .engine
        .topology_hints()
        .await
        .map_err(engine_unavailable)?;

    let mut counts = BTreeMap::new();
    for hint in &hints {
        *counts.entry(hint.hint.as_str().to_string()).or_insert(0) += 1;
    }

    Ok(Json(HintsResponse {
        hints: hints.into_iter().collect(),
        counts,
    }))
}

// ── /solicit, /advertise ──────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct BroadcastResponse {
    pub requested: BeaconType,
}

async fn request(
    state: &ApiState,
    kind: BeaconType,
) -> Result<Json<BroadcastResponse>, (StatusCode, String)> {
    state
        .engine
        .request_broadcast(kind)
        .await
        .map_err(engine_unavailable)?;
    tracing::info!(%kind, "multicast round requested via API");
    Ok(Json(BroadcastResponse { requested: kind }))
}

pub async fn handle_solicit(
    State(state): State<ApiState>,
) -> Result<Json<BroadcastResponse>, (StatusCode, String)> {
    request(&state, BeaconType::Solicitation).await
}

pub async fn handle_advertise(
    State(state): State<ApiState>,
) -> Result<Json<BroadcastResponse>, (StatusCode, String)> {
    request(&state, BeaconType::Advertisement).await
}
