use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::debug;

use super::AppState;
use crate::{Sensor, SensorId};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/sensors", get(list))
        .route("/sensors/{id}", get(show))
}

/// One registry entry as served over HTTP.
#[derive(Debug, Serialize)]
struct SensorEntry {
    id: SensorId,
    #[serde(flatten)]
    sensor: Sensor,
}

async fn list(State((registry, _)): State<AppState>) -> impl IntoResponse {
    // ---
    let entries: Vec<SensorEntry> = registry
        .list()
        .into_iter()
        .map(|(id, sensor)| SensorEntry { id, sensor })
        .collect();
    debug!("GET /sensors - {} entries", entries.len());
    Json(entries)
}

async fn show(
    Path(id): Path<SensorId>,
    State((registry, _)): State<AppState>,
) -> impl IntoResponse {
    // ---
    match registry.get(id) {
        Some(sensor) => (StatusCode::OK, Json(SensorEntry { id, sensor })).into_response(),
        None => (StatusCode::NOT_FOUND, Json("unknown sensor")).into_response(),
    }
}
