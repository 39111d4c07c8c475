//! Typed sensor state decoding.
//!
//! The gateway reports every sensor's `state` as a loose JSON object whose
//! shape depends on the sensor `type`. This module maps the type tag onto a
//! closed [`SensorType`] and decodes the payload into the matching
//! [`SensorState`] variant. Decoding is tolerant of missing, extra and
//! `null` fields, since payloads vary between firmware versions; only a
//! payload that is not an object, or an unparseable `lastupdated`, is
//! rejected.

use std::fmt;

use chrono::NaiveDateTime;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::error::StateError;

/// Value the gateway uses for `lastupdated` before the first report.
pub const NEVER_UPDATED: &str = "none";

// ---

/// Closed set of sensor types with a typed state.
///
/// Anything else the gateway reports is kept verbatim in [`SensorType::Other`]
/// so it can still be labelled and logged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum SensorType {
    Temperature,
    Humidity,
    Pressure,
    Daylight,
    OpenClose,
    Thermostat,
    Power,
    Other(String),
}

impl SensorType {
    // ---
    pub fn as_str(&self) -> &str {
        match self {
            SensorType::Temperature => "ZHATemperature",
            SensorType::Humidity => "ZHAHumidity",
            SensorType::Pressure => "ZHAPressure",
            SensorType::Daylight => "Daylight",
            SensorType::OpenClose => "ZHAOpenClose",
            SensorType::Thermostat => "ZHAThermostat",
            SensorType::Power => "ZHAPower",
            SensorType::Other(tag) => tag,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, SensorType::Other(_))
    }
}

impl From<&str> for SensorType {
    fn from(tag: &str) -> Self {
        match tag {
            "ZHATemperature" => SensorType::Temperature,
            "ZHAHumidity" => SensorType::Humidity,
            "ZHAPressure" => SensorType::Pressure,
            "Daylight" => SensorType::Daylight,
            "ZHAOpenClose" => SensorType::OpenClose,
            "ZHAThermostat" => SensorType::Thermostat,
            "ZHAPower" => SensorType::Power,
            other => SensorType::Other(other.to_string()),
        }
    }
}

impl From<String> for SensorType {
    fn from(tag: String) -> Self {
        SensorType::from(tag.as_str())
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SensorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ---

/// Temperature in centidegrees Celsius.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureState {
    #[serde(deserialize_with = "tolerant")]
    pub temperature: i32,
    #[serde(rename(deserialize = "lastupdated"), deserialize_with = "last_updated")]
    pub last_updated: Option<NaiveDateTime>,
}

/// Relative humidity in centipercent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumidityState {
    #[serde(deserialize_with = "tolerant")]
    pub humidity: i32,
    #[serde(rename(deserialize = "lastupdated"), deserialize_with = "last_updated")]
    pub last_updated: Option<NaiveDateTime>,
}

/// Air pressure in hectopascal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureState {
    #[serde(deserialize_with = "tolerant")]
    pub pressure: i32,
    #[serde(rename(deserialize = "lastupdated"), deserialize_with = "last_updated")]
    pub last_updated: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaylightState {
    #[serde(deserialize_with = "tolerant")]
    pub daylight: bool,
    #[serde(deserialize_with = "tolerant")]
    pub dark: bool,
    #[serde(deserialize_with = "tolerant")]
    pub status: i32,
    #[serde(rename(deserialize = "lastupdated"), deserialize_with = "last_updated")]
    pub last_updated: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenCloseState {
    #[serde(deserialize_with = "tolerant")]
    pub open: bool,
    #[serde(rename(deserialize = "lastupdated"), deserialize_with = "last_updated")]
    pub last_updated: Option<NaiveDateTime>,
}

/// Radiator thermostat. `valve` is the raw 0..=255 position.
///
/// The heat set point lives in the sensor config, not in the state payload,
/// see [`crate::sensor::Sensor::heatsetpoint`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatState {
    #[serde(deserialize_with = "tolerant")]
    pub temperature: i32,
    #[serde(deserialize_with = "tolerant")]
    pub valve: i32,
    #[serde(deserialize_with = "tolerant")]
    pub on: bool,
    #[serde(rename(deserialize = "lastupdated"), deserialize_with = "last_updated")]
    pub last_updated: Option<NaiveDateTime>,
}

/// Instantaneous power draw in watts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerState {
    #[serde(deserialize_with = "tolerant")]
    pub power: i32,
    #[serde(rename(deserialize = "lastupdated"), deserialize_with = "last_updated")]
    pub last_updated: Option<NaiveDateTime>,
}

/// Decoded state of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorState {
    Temperature(TemperatureState),
    Humidity(HumidityState),
    Pressure(PressureState),
    Daylight(DaylightState),
    OpenClose(OpenCloseState),
    Thermostat(ThermostatState),
    Power(PowerState),
    /// The sensor's type has no typed state, or its payload never decoded.
    Unrecognized,
}

impl SensorState {
    /// Decode `raw` as the state of a sensor of type `kind`.
    ///
    /// Unknown types yield [`StateError::UnsupportedType`]; callers treat it
    /// as "nothing to do" rather than as a failure.
    pub fn parse(kind: &SensorType, raw: &Value) -> Result<Self, StateError> {
        // ---
        if let SensorType::Other(tag) = kind {
            return Err(StateError::UnsupportedType(tag.clone()));
        }
        if !raw.is_object() {
            return Err(StateError::NotAnObject(json_kind(raw).to_string()));
        }

        let state = match kind {
            SensorType::Temperature => SensorState::Temperature(decode(kind, raw)?),
            SensorType::Humidity => SensorState::Humidity(decode(kind, raw)?),
            SensorType::Pressure => SensorState::Pressure(decode(kind, raw)?),
            SensorType::Daylight => SensorState::Daylight(decode(kind, raw)?),
            SensorType::OpenClose => SensorState::OpenClose(decode(kind, raw)?),
            SensorType::Thermostat => SensorState::Thermostat(decode(kind, raw)?),
            SensorType::Power => SensorState::Power(decode(kind, raw)?),
            SensorType::Other(tag) => return Err(StateError::UnsupportedType(tag.clone())),
        };
        Ok(state)
    }

    /// When the gateway last saw a report, `None` if never.
    pub fn last_updated(&self) -> Option<NaiveDateTime> {
        match self {
            SensorState::Temperature(s) => s.last_updated,
            SensorState::Humidity(s) => s.last_updated,
            SensorState::Pressure(s) => s.last_updated,
            SensorState::Daylight(s) => s.last_updated,
            SensorState::OpenClose(s) => s.last_updated,
            SensorState::Thermostat(s) => s.last_updated,
            SensorState::Power(s) => s.last_updated,
            SensorState::Unrecognized => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, SensorState::Unrecognized)
    }
}

fn decode<T: DeserializeOwned>(kind: &SensorType, raw: &Value) -> Result<T, StateError> {
    T::deserialize(raw).map_err(|source| StateError::Malformed {
        kind: kind.to_string(),
        source,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Scalar state fields read `null`, or a value of the wrong JSON type, as
/// their default, the same as an absent field.
fn tolerant<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let raw = Value::deserialize(deserializer)?;
    match T::deserialize(&raw) {
        Ok(value) => Ok(value),
        Err(e) => {
            if !raw.is_null() {
                debug!("ignoring state field {}: {}", raw, e);
            }
            Ok(T::default())
        }
    }
}

/// `lastupdated` is a naive local timestamp, `"none"` or null before the
/// first report.
fn last_updated<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some(NEVER_UPDATED) => Ok(None),
        Some(text) => text
            .parse::<NaiveDateTime>()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid lastupdated '{text}': {e}"))),
    }
}
