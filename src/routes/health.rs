// src/routes/health.rs
//! Liveness endpoint for the exporter.
//!
//! This module defines the `/health` route used by container orchestrators
//! and supervisors to verify that the process is up and able to respond to
//! HTTP requests. It is a sibling module in the `routes` directory:
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`.
///
/// Returns a static JSON object. It does not look at the registry or the
/// gateway connection.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Create a subrouter containing the `/health` route.
///
/// Generic over the application state so it merges cleanly with the gateway
/// router regardless of the state type.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
