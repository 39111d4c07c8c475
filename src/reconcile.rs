//! Applies stream events to the registry.
//!
//! [`Reconciler`] holds the merge rules for a single event. [`listen`] owns
//! the WebSocket: one spawned task reads frames in order and is the only
//! writer to the registry, while the caller's task waits for that reader to
//! finish or for the shutdown token.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EnvelopeError;
use crate::event::{Event, EventKind};
use crate::registry::SensorRegistry;
use crate::sensor::SensorId;

/// How long to wait for the gateway to answer our close frame.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A `changed` event for a known sensor. Flags say which parts were
    /// written.
    Applied { state: bool, config: bool },
    /// A `changed` event for an id the registry does not know.
    UnknownSensor(SensorId),
    /// A `changed` event without an id.
    MissingId,
    /// Event kinds that are decoded but not applied.
    NotSupported(EventKind),
    /// Events about lights, groups, scenes and other non-sensor resources.
    IgnoredResource(String),
}

pub struct Reconciler {
    // ---
    registry: Arc<SensorRegistry>,
}

impl Reconciler {
    // ---
    pub fn new(registry: Arc<SensorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    /// Decode one text frame and apply it.
    ///
    /// Only a broken envelope is an error; everything inside it is handled
    /// and logged here.
    pub fn handle_message(&self, raw: &str) -> Result<Outcome, EnvelopeError> {
        let event = Event::decode(raw)?;
        Ok(self.apply(&event))
    }

    pub fn apply(&self, event: &Event) -> Outcome {
        // ---
        if let Some(resource) = event.resource.as_deref().filter(|_| !event.is_sensor_event()) {
            debug!("ignoring {} event for {}", event.kind, resource);
            return Outcome::IgnoredResource(resource.to_string());
        }

        match event.kind {
            EventKind::Changed => self.apply_changed(event),
            ref kind => {
                info!(id = ?event.id, "{} events are not supported yet", kind);
                Outcome::NotSupported(kind.clone())
            }
        }
    }

    fn apply_changed(&self, event: &Event) -> Outcome {
        // ---
        let Some(id) = event.id else {
            warn!("changed event without id");
            return Outcome::MissingId;
        };

        let config = match event.sensor_config() {
            Some(Ok(config)) => Some(config),
            Some(Err(e)) => {
                warn!(id, "skipping config update: {}", e);
                None
            }
            None => None,
        };

        let mut state_applied = false;
        let mut config_applied = false;

        let known = self.registry.update(id, |sensor| {
            if let Some(unique_id) = event.unique_id.as_deref() {
                if !sensor.unique_id().is_empty() && unique_id != sensor.unique_id() {
                    warn!(
                        id,
                        "event unique id {} does not match {} ({})",
                        unique_id,
                        sensor.unique_id(),
                        sensor.name()
                    );
                }
            }

            if let Some(raw) = event.state.as_ref() {
                match sensor.replace_state(raw) {
                    Ok(()) => state_applied = true,
                    Err(e) if e.is_unsupported() => debug!("{}: {}", sensor, e),
                    Err(e) => warn!("skipping state update of {}: {}", sensor, e),
                }
            }

            if let Some(config) = config.as_ref() {
                if sensor.apply_config(config) {
                    config_applied = true;
                    debug!("update config value of {} ({:?})", sensor, config);
                }
            }

            if state_applied || config_applied {
                debug!("update for {}", sensor);
            }
            state_applied || config_applied
        });

        match known {
            Some(_) => Outcome::Applied {
                state: state_applied,
                config: config_applied,
            },
            None => {
                warn!(id, "changed event for unknown sensor");
                Outcome::UnknownSensor(id)
            }
        }
    }
}

// ---

/// Why [`listen`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenExit {
    /// Shutdown was requested and the close handshake was attempted.
    Shutdown,
    /// The gateway closed the stream.
    Closed,
    /// Reading from the stream failed.
    ConnectionLost(String),
    /// A frame did not decode as an event envelope.
    MalformedEnvelope(String),
}

/// Read `stream` until it ends or `shutdown` fires.
///
/// Frames are applied strictly in arrival order by a single reader task.
/// On shutdown a normal close frame is sent and the reader gets
/// [`CLOSE_GRACE`] to see the gateway's reply before it is aborted.
pub async fn listen<S>(
    stream: S,
    reconciler: Arc<Reconciler>,
    shutdown: CancellationToken,
    verbose: bool,
) -> ListenExit
where
    S: Stream<Item = Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Send
        + Unpin
        + 'static,
{
    // ---
    let (mut sink, source) = stream.split();
    let mut reader = tokio::spawn(read_loop(source, reconciler, verbose));

    tokio::select! {
        joined = &mut reader => match joined {
            Ok(exit) => exit,
            Err(e) => {
                error!("event reader task failed: {}", e);
                ListenExit::ConnectionLost(e.to_string())
            }
        },
        _ = shutdown.cancelled() => {
            info!("interrupt");

            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            }));
            if let Err(e) = sink.send(close).await {
                warn!("write close: {}", e);
                reader.abort();
                return ListenExit::Shutdown;
            }

            match tokio::time::timeout(CLOSE_GRACE, &mut reader).await {
                Ok(_) => debug!("gateway acknowledged close"),
                Err(_) => {
                    debug!("no close reply within {:?}, giving up", CLOSE_GRACE);
                    reader.abort();
                }
            }
            ListenExit::Shutdown
        }
    }
}

async fn read_loop<R>(mut source: R, reconciler: Arc<Reconciler>, verbose: bool) -> ListenExit
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    // ---
    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(reason)) => {
                info!("event stream closed by gateway: {:?}", reason);
                return ListenExit::Closed;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("read: {}", e);
                return ListenExit::ConnectionLost(e.to_string());
            }
        };

        if verbose {
            info!("recv: {}", text);
        } else {
            debug!("recv: {}", text);
        }

        if let Err(e) = reconciler.handle_message(&text) {
            error!("parse error: {}", e);
            return ListenExit::MalformedEnvelope(e.to_string());
        }
    }

    info!("event stream ended");
    ListenExit::Closed
}
