//! REST client for the deCONZ gateway.
//!
//! Only two documents are read: the sensor list used for the initial
//! snapshot and the gateway config, which tells us where the event stream
//! lives.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::sensor::{SensorDescription, SensorId};

/// The parts of `GET /api/<token>/config` the exporter cares about.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub name: String,
    #[serde(rename = "apiversion")]
    pub api_version: String,
    #[serde(rename = "swversion")]
    pub sw_version: String,
    #[serde(rename = "bridgeid")]
    pub bridge_id: String,
    #[serde(rename = "websocketport")]
    pub websocket_port: Option<u16>,
}

/// Full sensor list keyed by numeric id.
pub type Snapshot = HashMap<SensorId, SensorDescription>;

// ---

#[derive(Debug, Clone)]
pub struct GatewayClient {
    // ---
    http: reqwest::Client,
    host: String,
    port: u16,
    token: String,
}

impl GatewayClient {
    // ---
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into(),
            port,
            token: token.into(),
        }
    }

    /// URL of a REST endpoint below `/api/<token>/`.
    pub fn api_url(&self, endpoint: &str) -> String {
        format!(
            "http://{}:{}/api/{}/{}",
            self.host, self.port, self.token, endpoint
        )
    }

    /// URL of the event stream on the given WebSocket port.
    pub fn websocket_url(&self, ws_port: u16) -> String {
        format!("ws://{}:{}", self.host, ws_port)
    }

    /// Fetch the bulk snapshot of every sensor.
    pub async fn fetch_sensors(&self) -> GatewayResult<Snapshot> {
        self.get_json("sensors").await
    }

    pub async fn fetch_config(&self) -> GatewayResult<GatewayConfig> {
        self.get_json("config").await
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> GatewayResult<T> {
        // ---
        let url = self.api_url(endpoint);
        debug!("GET {}", self.redact(&url));

        let transport = |source| GatewayError::Transport {
            url: self.redact(&url),
            source,
        };

        let response = self.http.get(&url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                url: self.redact(&url),
                status,
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&body).map_err(|source| GatewayError::Decode {
            url: self.redact(&url),
            source,
        })
    }

    /// Keep the API token out of logs and error messages.
    fn redact(&self, url: &str) -> String {
        if self.token.is_empty() {
            return url.to_string();
        }
        url.replace(&self.token, "****")
    }
}
