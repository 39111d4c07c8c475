//! Configuration loader for the `deconz-exporter` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::env;

use anyhow::{anyhow, Result};

/// Parse an optional numeric environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("{} must be an integer: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("{} is required", $var_name))?
    };
}

/// Default port of the exporter's own HTTP server.
pub const DEFAULT_APP_PORT: u16 = 8080;

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Host name or address of the deCONZ gateway.
    pub host: String,

    /// Port of the gateway's REST API.
    pub port: u16,

    /// API key used in `/api/<token>/...`.
    pub token: String,

    /// Port the exporter serves `/metrics` on.
    pub app_port: u16,

    /// WebSocket port override; discovered from the gateway config when unset.
    pub ws_port: Option<u16>,

    /// Delay before reconnecting a lost event stream, 0 disables reconnecting.
    pub reconnect_secs: u64,

    /// Log every raw event and dump the registry after loading.
    pub verbose: bool,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DECONZ_HOST` – gateway host
/// - `DECONZ_PORT` – gateway REST port
/// - `DECONZ_TOKEN` – gateway API key
///
/// Optional:
/// - `DECONZ_APP_PORT` – exporter HTTP port (default: 8080)
/// - `DECONZ_WS_PORT` – event stream port (default: from gateway config)
/// - `DECONZ_RECONNECT_SECS` – reconnect delay (default: 0, disabled)
/// - `DECONZ_VERBOSE` – `1|true|yes` enables verbose logging
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let host = require_env!("DECONZ_HOST");
    let token = require_env!("DECONZ_TOKEN");
    let port = require_env!("DECONZ_PORT")
        .trim()
        .parse::<u16>()
        .map_err(|e| anyhow!("DECONZ_PORT must be an integer: {}", e))?;
    let app_port = parse_env!("DECONZ_APP_PORT", u16, DEFAULT_APP_PORT);
    let ws_port = match parse_env!("DECONZ_WS_PORT", u16, 0) {
        0 => None,
        p => Some(p),
    };
    let reconnect_secs = parse_env!("DECONZ_RECONNECT_SECS", u64, 0);
    let verbose = parse_flag(env::var("DECONZ_VERBOSE").ok().as_deref());

    Ok(Config {
        host,
        port,
        token,
        app_port,
        ws_port,
        reconnect_secs,
        verbose,
    })
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true") | Some("yes"))
}

/// Show only the first and last two characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    // ---
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}****{tail}")
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the API token while showing all other configuration values.
    pub fn log_config(&self) {
        // ---
        let ws_port = self
            .ws_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "(from gateway)".to_string());

        tracing::info!("Configuration loaded:");
        tracing::info!("  DECONZ_HOST           : {}", self.host);
        tracing::info!("  DECONZ_PORT           : {}", self.port);
        tracing::info!("  DECONZ_TOKEN          : {}", mask_secret(&self.token));
        tracing::info!("  DECONZ_APP_PORT       : {}", self.app_port);
        tracing::info!("  DECONZ_WS_PORT        : {}", ws_port);
        tracing::info!("  DECONZ_RECONNECT_SECS : {}", self.reconnect_secs);
        tracing::info!("  DECONZ_VERBOSE        : {}", self.verbose);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_mask_secret() {
        // ---
        assert_eq!(mask_secret("0123456789ABCDEF"), "01****EF");
        assert_eq!(mask_secret("abcd"), "****");
        assert_eq!(mask_secret(""), "****");
    }

    #[test]
    fn test_parse_flag() {
        // ---
        assert!(parse_flag(Some("1")));
        assert!(parse_flag(Some("true")));
        assert!(parse_flag(Some("yes")));
        assert!(!parse_flag(Some("0")));
        assert!(!parse_flag(Some("no")));
        assert!(!parse_flag(None));
    }
}
