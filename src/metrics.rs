//! Metric projection and the Prometheus sink.
//!
//! [`project`] turns one sensor into the gauge observations for its state
//! variant. [`SensorMetrics`] keeps the latest value per metric and label
//! set and renders them in the Prometheus text exposition format for the
//! `/metrics` route.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Local, NaiveDateTime};
use dashmap::DashMap;
use tracing::debug;

use crate::gateway::GatewayConfig;
use crate::sensor::Sensor;
use crate::state::SensorState;

/// Receiver of sensor snapshots; called after every successful change.
pub trait MetricsSink: Send + Sync {
    fn observe(&self, sensor: &Sensor);

    /// Publish a complete sensor set. Anything published earlier for
    /// sensors outside the set may be forgotten.
    fn observe_all(&self, sensors: &[Sensor]) {
        for sensor in sensors {
            self.observe(sensor);
        }
    }
}

// ---

/// Every gauge and counter the exporter publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Temperature,
    Humidity,
    Pressure,
    Open,
    Power,
    Valve,
    ThermostatOn,
    HeatSetpoint,
    Battery,
    SinceUpdate,
    GatewayInfo,
}

impl Metric {
    // ---
    pub fn name(self) -> &'static str {
        match self {
            Metric::Temperature => "deconz_sensor_temperature",
            Metric::Humidity => "deconz_sensor_humidity",
            Metric::Pressure => "deconz_sensor_pressure",
            Metric::Open => "deconz_sensor_open",
            Metric::Power => "deconz_sensor_power",
            Metric::Valve => "deconz_sensor_valve",
            Metric::ThermostatOn => "deconz_sensor_thermostat_on",
            Metric::HeatSetpoint => "deconz_sensor_heatsetpoint",
            Metric::Battery => "deconz_sensor_battery",
            Metric::SinceUpdate => "deconz_sensor_sinceUpdate",
            Metric::GatewayInfo => "deconz_gateway_info",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Metric::Temperature => "Temperature of sensor in Celsius",
            Metric::Humidity => "Humidity of sensor in percent",
            Metric::Pressure => "Air pressure in hectopascal (hPa)",
            Metric::Open => "Whether the contact sensor reports open (1) or closed (0)",
            Metric::Power => "Power consumption in watts",
            Metric::Valve => "Thermostat valve position",
            Metric::ThermostatOn => "Whether the thermostat is switched on",
            Metric::HeatSetpoint => "Thermostat target temperature in Celsius",
            Metric::Battery => "Battery level of sensor in percent",
            Metric::SinceUpdate => {
                "The time since the last update that was received from this sensor"
            }
            Metric::GatewayInfo => "Information about the connected deCONZ gateway",
        }
    }
}

/// Ordered label pairs. Order is the exposition order.
pub type Labels = Vec<(&'static str, String)>;

/// One gauge value produced by [`project`].
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric: Metric,
    pub labels: Labels,
    pub value: f64,
}

/// Labels for metrics that are specific to a sensor type.
pub fn sensor_labels(sensor: &Sensor) -> Labels {
    vec![
        ("name", sensor.name().to_string()),
        ("uid", sensor.unique_id().to_string()),
        ("manufacturer", sensor.manufacturer().to_string()),
        ("model", sensor.model_id().to_string()),
        ("type", sensor.kind().to_string()),
    ]
}

/// Labels for metrics every sensor has (battery, staleness).
pub fn slim_labels(sensor: &Sensor) -> Labels {
    vec![
        ("name", sensor.name().to_string()),
        ("manufacturer", sensor.manufacturer().to_string()),
        ("model", sensor.model_id().to_string()),
    ]
}

/// Seconds between `last_updated` and `now`.
///
/// A sensor that never reported, or a timestamp ahead of our clock, yields
/// zero.
pub fn since_update(last_updated: Option<NaiveDateTime>, now: NaiveDateTime) -> f64 {
    // ---
    match last_updated {
        Some(at) => ((now - at).num_milliseconds() as f64 / 1000.0).max(0.0),
        None => 0.0,
    }
}

/// Convert a raw 0..=255 valve position to the published scale.
pub fn valve_position(raw: i32) -> f64 {
    raw as f64 / 25.5 * 10.0
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Compute every observation for `sensor` at time `now`.
///
/// Unrecognized sensors project nothing at all.
pub fn project(sensor: &Sensor, now: NaiveDateTime) -> Vec<Observation> {
    // ---
    let labels = sensor_labels(sensor);
    let mut out = Vec::new();
    let mut push = |metric: Metric, labels: &Labels, value: f64| {
        out.push(Observation {
            metric,
            labels: labels.clone(),
            value,
        })
    };

    match &sensor.state {
        SensorState::Temperature(s) => {
            push(Metric::Temperature, &labels, s.temperature as f64 / 100.0)
        }
        SensorState::Humidity(s) => push(Metric::Humidity, &labels, s.humidity as f64 / 100.0),
        SensorState::Pressure(s) => push(Metric::Pressure, &labels, s.pressure as f64),
        SensorState::Daylight(_) => {}
        SensorState::OpenClose(s) => push(Metric::Open, &labels, flag(s.open)),
        SensorState::Thermostat(s) => {
            push(Metric::Temperature, &labels, s.temperature as f64 / 100.0);
            push(Metric::Valve, &labels, valve_position(s.valve));
            push(Metric::ThermostatOn, &labels, flag(s.on));
            if let Some(setpoint) = sensor.heatsetpoint {
                push(Metric::HeatSetpoint, &labels, setpoint as f64 / 100.0);
            }
        }
        SensorState::Power(s) => push(Metric::Power, &labels, s.power as f64),
        SensorState::Unrecognized => return Vec::new(),
    }

    let slim = slim_labels(sensor);
    push(
        Metric::SinceUpdate,
        &slim,
        since_update(sensor.state.last_updated(), now),
    );
    if let Some(level) = sensor.battery {
        push(Metric::Battery, &slim, level as f64);
    }

    out
}

// ---

/// Latest-value gauge store plus the error counter.
///
/// Safe to share between the stream reader and the scrape handler.
#[derive(Debug, Default)]
pub struct SensorMetrics {
    gauges: DashMap<(Metric, Labels), f64>,
    errors: AtomicU64,
}

impl SensorMetrics {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, observation: Observation) {
        self.gauges
            .insert((observation.metric, observation.labels), observation.value);
    }

    /// Current value of one gauge, mostly useful in tests.
    pub fn gauge(&self, metric: Metric, labels: &Labels) -> Option<f64> {
        self.gauges
            .get(&(metric, labels.clone()))
            .map(|entry| *entry.value())
    }

    /// Count one failed attempt to fetch data from the gateway.
    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn set_gateway_info(&self, config: &GatewayConfig) {
        // ---
        let labels = vec![
            ("name", config.name.clone()),
            ("apiversion", config.api_version.clone()),
            ("swversion", config.sw_version.clone()),
            ("bridgeid", config.bridge_id.clone()),
        ];
        self.gauges.retain(|(metric, _), _| *metric != Metric::GatewayInfo);
        self.gauges.insert((Metric::GatewayInfo, labels), 1.0);
    }

    /// Render everything in Prometheus text format, sorted for stable output.
    pub fn render(&self) -> String {
        // ---
        let mut grouped: BTreeMap<Metric, Vec<(Labels, f64)>> = BTreeMap::new();
        for entry in self.gauges.iter() {
            let (metric, labels) = entry.key();
            grouped
                .entry(*metric)
                .or_default()
                .push((labels.clone(), *entry.value()));
        }

        let mut out = String::new();
        for (metric, mut rows) in grouped {
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            let _ = writeln!(out, "# HELP {} {}", metric.name(), metric.help());
            let _ = writeln!(out, "# TYPE {} gauge", metric.name());
            for (labels, value) in rows {
                let _ = writeln!(out, "{}{} {}", metric.name(), format_labels(&labels), value);
            }
        }

        let _ = writeln!(out, "# HELP deconz_sensor_errors Failures to retrieve data from API");
        let _ = writeln!(out, "# TYPE deconz_sensor_errors counter");
        let _ = writeln!(out, "deconz_sensor_errors {}", self.errors());
        out
    }
}

impl MetricsSink for SensorMetrics {
    fn observe(&self, sensor: &Sensor) {
        for observation in project(sensor, Local::now().naive_local()) {
            self.record(observation);
        }
    }

    /// Record every sensor, then drop sensor rows the set no longer
    /// produces (removed or renamed sensors, batteries gone unknown).
    fn observe_all(&self, sensors: &[Sensor]) {
        // ---
        let now = Local::now().naive_local();
        let mut live = HashSet::new();
        for sensor in sensors {
            for observation in project(sensor, now) {
                live.insert((observation.metric, observation.labels.clone()));
                self.record(observation);
            }
        }

        let before = self.gauges.len();
        self.gauges
            .retain(|key, _| key.0 == Metric::GatewayInfo || live.contains(key));
        let pruned = before.saturating_sub(self.gauges.len());
        if pruned > 0 {
            debug!("dropped {} stale gauge rows", pruned);
        }
    }
}

fn format_labels(labels: &Labels) -> String {
    // ---
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{}\"", escape_label(value)))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
