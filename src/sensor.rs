//! Sensor descriptions from the REST API and the in-memory sensor entity.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StateError;
use crate::state::{SensorState, SensorType};

/// Numeric sensor id assigned by the gateway.
pub type SensorId = u32;

// ---

/// The `config` block of a sensor, as found both in the REST description
/// and in `changed` events.
///
/// `battery` is kept raw: the gateway reports `null` for mains powered
/// devices and events may omit it entirely, so only
/// [`SensorConfig::battery_level`] decides whether a real reading is present.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub battery: Option<i32>,
    pub offset: Option<i32>,
    pub on: bool,
    pub reachable: bool,
    pub heatsetpoint: Option<i32>,
}

impl SensorConfig {
    /// Decode a raw `config` block. A missing or `null` block is empty.
    pub fn from_raw(raw: &Value) -> Result<Self, serde_json::Error> {
        // ---
        if raw.is_null() {
            return Ok(Self::default());
        }
        Self::deserialize(raw)
    }

    /// Battery percentage, if the block carries a value in `0..=100`.
    ///
    /// Anything else (absent, `null`, the `-1` sentinel) means "no reading".
    pub fn battery_level(&self) -> Option<u8> {
        // ---
        self.battery
            .and_then(|b| u8::try_from(b).ok())
            .filter(|b| *b <= 100)
    }
}

/// One entry of the `GET /api/<token>/sensors` document.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorDescription {
    // ---
    /// Raw `config` block; see [`SensorConfig::from_raw`].
    #[serde(default)]
    pub config: Value,
    #[serde(default, rename = "ep")]
    pub endpoint: Option<i32>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default, rename = "manufacturername")]
    pub manufacturer: String,
    #[serde(default, rename = "modelid")]
    pub model_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mode: Option<i32>,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub swversion: Option<String>,
    #[serde(rename = "type")]
    pub kind: SensorType,
    #[serde(default, rename = "uniqueid")]
    pub unique_id: String,
}

impl fmt::Display for SensorDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// In-memory view of one physical sensor.
///
/// Identity and descriptive fields are fixed at creation; only the state and
/// the config attributes change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    // ---
    name: String,
    #[serde(rename = "type")]
    kind: SensorType,
    manufacturer: String,
    model_id: String,
    unique_id: String,

    pub state: SensorState,
    pub battery: Option<u8>,
    pub on: bool,
    pub reachable: bool,
    /// Target temperature of a thermostat in centidegrees.
    pub heatsetpoint: Option<i32>,
}

impl Sensor {
    /// Build the entity for one snapshot entry.
    ///
    /// A state that cannot be decoded leaves the sensor `Unrecognized` rather
    /// than dropping it, so its config still shows up in the registry. A
    /// broken config block is replaced by an empty one.
    pub fn from_description(desc: &SensorDescription) -> Self {
        // ---
        let state = match SensorState::parse(&desc.kind, &desc.state) {
            Ok(state) => state,
            Err(e) if e.is_unsupported() => {
                debug!("{}: {}", desc, e);
                SensorState::Unrecognized
            }
            Err(e) => {
                warn!("{}: {}", desc, e);
                SensorState::Unrecognized
            }
        };

        let config = SensorConfig::from_raw(&desc.config).unwrap_or_else(|e| {
            warn!("{}: ignoring config: {}", desc, e);
            SensorConfig::default()
        });

        Sensor {
            name: desc.name.clone(),
            kind: desc.kind.clone(),
            manufacturer: desc.manufacturer.clone(),
            model_id: desc.model_id.clone(),
            unique_id: desc.unique_id.clone(),
            state,
            battery: config.battery_level(),
            on: config.on,
            reachable: config.reachable,
            heatsetpoint: config.heatsetpoint,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &SensorType {
        &self.kind
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Replace the state wholesale with `raw`, decoded as this sensor's type.
    ///
    /// On error the previous state is left untouched.
    pub fn replace_state(&mut self, raw: &Value) -> Result<(), StateError> {
        // ---
        self.state = SensorState::parse(&self.kind, raw)?;
        Ok(())
    }

    /// Merge a config block from an event.
    ///
    /// `battery`, `reachable` and `on` move together and only when the block
    /// carries a real battery reading. The heat set point is applied on its
    /// own whenever present. Returns whether anything was written.
    pub fn apply_config(&mut self, config: &SensorConfig) -> bool {
        // ---
        let mut applied = false;

        if let Some(level) = config.battery_level() {
            self.battery = Some(level);
            self.reachable = config.reachable;
            self.on = config.on;
            applied = true;
        }

        if let Some(setpoint) = config.heatsetpoint {
            self.heatsetpoint = Some(setpoint);
            applied = true;
        }

        applied
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}
