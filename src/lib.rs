//! Mirror of a deCONZ gateway's sensor state, exported as Prometheus metrics.
//!
//! The gateway is read twice: once through the REST API for a full snapshot
//! of every sensor, then continuously through its WebSocket event stream.
//! Snapshot entries become [`Sensor`]s in the [`SensorRegistry`]; stream
//! events are merged into them by the [`Reconciler`], and every change is
//! handed to a [`MetricsSink`].
//!
//! Modules are exported through this file only, so the binary and the
//! route handlers never reach into sibling modules directly.

pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod metrics;
pub mod reconcile;
pub mod registry;
pub mod routes;
pub mod sensor;
pub mod state;

pub use config::Config;
pub use error::{EnvelopeError, GatewayError, StateError};
pub use event::{Event, EventKind};
pub use gateway::{GatewayClient, GatewayConfig, Snapshot};
pub use metrics::{MetricsSink, SensorMetrics};
pub use reconcile::{listen, ListenExit, Outcome, Reconciler};
pub use registry::SensorRegistry;
pub use sensor::{Sensor, SensorConfig, SensorDescription, SensorId};
pub use state::{SensorState, SensorType};
