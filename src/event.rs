//! Event envelope pushed by the gateway over the WebSocket.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::error::EnvelopeError;
use crate::sensor::{SensorConfig, SensorDescription, SensorId};

/// What happened to the resource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum EventKind {
    Added,
    Changed,
    Deleted,
    SceneCalled,
    Other(String),
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "added" => EventKind::Added,
            "changed" => EventKind::Changed,
            "deleted" => EventKind::Deleted,
            "scene-called" => EventKind::SceneCalled,
            _ => EventKind::Other(tag),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Added => f.write_str("added"),
            EventKind::Changed => f.write_str("changed"),
            EventKind::Deleted => f.write_str("deleted"),
            EventKind::SceneCalled => f.write_str("scene-called"),
            EventKind::Other(tag) => f.write_str(tag),
        }
    }
}

/// One message from the event stream.
///
/// Only `e`, `id`, `r`, `state` and `config` drive reconciliation; the rest
/// is kept for logging and for event kinds that are not applied yet.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    // ---
    #[serde(rename = "t", default)]
    pub message_type: String,
    #[serde(rename = "e")]
    pub kind: EventKind,
    #[serde(default, deserialize_with = "numeric_id")]
    pub id: Option<SensorId>,
    #[serde(rename = "uniqueid", default)]
    pub unique_id: Option<String>,
    #[serde(rename = "r", default)]
    pub resource: Option<String>,
    #[serde(rename = "gid", default)]
    pub group_id: Option<String>,
    #[serde(rename = "scid", default)]
    pub scene_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<Value>,
    /// Raw `config` block, decoded by [`Event::sensor_config`].
    #[serde(default)]
    pub config: Option<Value>,
    /// Full description sent along with `added`, decoded by
    /// [`Event::description`].
    #[serde(default)]
    pub sensor: Option<Value>,
}

impl Event {
    /// Decode one text frame.
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Whether this event concerns a sensor. Events without an `r` field are
    /// assumed to.
    pub fn is_sensor_event(&self) -> bool {
        self.resource.as_deref().map_or(true, |r| r == "sensors")
    }

    /// Decode the `config` block, if any.
    ///
    /// A broken block is a payload error, not an envelope error: the caller
    /// skips the config step and keeps going.
    pub fn sensor_config(&self) -> Option<Result<SensorConfig, serde_json::Error>> {
        self.config.as_ref().map(SensorConfig::from_raw)
    }

    /// Decode the embedded sensor description sent with `added`.
    pub fn description(&self) -> Option<Result<SensorDescription, serde_json::Error>> {
        self.sensor.as_ref().map(|raw| SensorDescription::deserialize(raw))
    }
}

/// The gateway sends ids as strings (`"12"`), but accept plain numbers too.
fn numeric_id<'de, D>(deserializer: D) -> Result<Option<SensorId>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(SensorId),
    }

    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Number(id)) => Ok(Some(id)),
        Some(RawId::Text(text)) => text
            .trim()
            .parse::<SensorId>()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid id '{text}': {e}"))),
    }
}
