use axum::{
    extract::State, http::header::CONTENT_TYPE, response::IntoResponse, routing::get, Router,
};
use tracing::debug;

use super::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/metrics", get(handler))
}

/// Prometheus scrape endpoint.
async fn handler(State((_, metrics)): State<AppState>) -> impl IntoResponse {
    // ---
    debug!("GET /metrics");
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render(),
    )
}
