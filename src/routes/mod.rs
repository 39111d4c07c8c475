//! HTTP routes served by the exporter.
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared state so `main.rs` only ever calls [`router`].

use std::sync::Arc;

use axum::Router;

use crate::{SensorMetrics, SensorRegistry};

mod health;
mod index;
mod metrics;
mod sensors;

/// State shared by every handler.
pub type AppState = (Arc<SensorRegistry>, Arc<SensorMetrics>);

// ---

pub fn router(registry: Arc<SensorRegistry>, metrics: Arc<SensorMetrics>) -> Router {
    // ---
    Router::new()
        .merge(index::router())
        .merge(metrics::router())
        .merge(sensors::router())
        .merge(health::router())
        .with_state((registry, metrics))
}
