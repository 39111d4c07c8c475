//! Error types for the sensor synchronisation core.
//!
//! The split mirrors how far a failure is allowed to travel: a
//! [`StateError`] only ever skips one field update, an [`EnvelopeError`]
//! ends the current stream connection, and a [`GatewayError`] is fatal
//! when it happens during startup.

use thiserror::Error;

/// Failure to turn a raw state payload into a typed sensor state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The sensor type tag is not one we know how to decode.
    #[error("unsupported sensor type '{0}'")]
    UnsupportedType(String),

    /// The payload was not a JSON object at all.
    #[error("state payload is not an object: {0}")]
    NotAnObject(String),

    /// The payload was an object but a field could not be decoded.
    #[error("malformed {kind} state: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    /// Unsupported types are expected over time and are not worth more than
    /// a debug line.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, StateError::UnsupportedType(_))
    }
}

/// Failure to decode the outer event envelope from the stream.
#[derive(Debug, Error)]
#[error("malformed event envelope: {0}")]
pub struct EnvelopeError(#[from] pub serde_json::Error);

/// Failure while talking to the gateway's REST API.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request could not be sent or the response body not read.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The gateway answered with a non-success status.
    #[error("gateway answered {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The response body was not the document we expected.
    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type GatewayResult<T> = Result<T, GatewayError>;
