mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use deconz_exporter::metrics::{sensor_labels, Metric};
use deconz_exporter::{listen, ListenExit, Reconciler, SensorState};

/// Accept one WebSocket client, push `frames` to it, then either close the
/// stream or keep reading until the client goes away.
async fn event_server(frames: Vec<String>, close_after: bool) -> String {
    // ---
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        for frame in frames {
            ws.send(Message::Text(frame)).await.unwrap();
        }
        if close_after {
            let _ = ws.close(None).await;
        }
        // Reading drives the close handshake when the client hangs up.
        while let Some(Ok(_)) = ws.next().await {}
    });

    format!("ws://{addr}")
}

fn temperature_of(reconciler: &Reconciler, id: u32) -> Option<i32> {
    match reconciler.registry().get(id)?.state {
        SensorState::Temperature(s) => Some(s.temperature),
        _ => None,
    }
}

#[tokio::test]
async fn changed_events_are_applied_in_order() {
    // ---
    let gateway = common::fake_gateway().await;
    let (registry, metrics) = common::loaded_registry(gateway).await;
    let reconciler = Arc::new(Reconciler::new(registry.clone()));

    let url = event_server(
        vec![
            r#"{"t":"event","e":"changed","r":"sensors","id":"1","uniqueid":"00:15:8d:00:01:02:03:04-01-0402","config":{"battery":-1}}"#.to_string(),
            r#"{"t":"event","e":"changed","r":"sensors","id":"1","uniqueid":"00:15:8d:00:01:02:03:04-01-0402","state":{"temperature":2500,"lastupdated":"2023-01-01T12:04:00"}}"#.to_string(),
            r#"{"t":"event","e":"changed","r":"sensors","id":"1","uniqueid":"00:15:8d:00:01:02:03:04-01-0402","state":{"temperature":1980,"lastupdated":"2023-01-01T12:05:00"}}"#.to_string(),
            r#"{"t":"event","e":"changed","r":"sensors","id":"77","state":{"temperature":100}}"#.to_string(),
            r#"{"t":"event","e":"deleted","r":"sensors","id":"1"}"#.to_string(),
        ],
        true,
    )
    .await;

    let (stream, _) = connect_async(url.as_str()).await.unwrap();
    let exit = listen(stream, reconciler.clone(), CancellationToken::new(), false).await;

    assert_eq!(exit, ListenExit::Closed);
    assert_eq!(temperature_of(&reconciler, 1), Some(1980));

    let sensor = registry.get(1).unwrap();
    assert_eq!(sensor.battery, Some(80));
    assert!(!registry.contains(77));
    assert_eq!(
        metrics.gauge(Metric::Temperature, &sensor_labels(&sensor)),
        Some(19.8)
    );
}

#[tokio::test]
async fn malformed_envelope_ends_the_stream() {
    // ---
    let gateway = common::fake_gateway().await;
    let (registry, _) = common::loaded_registry(gateway).await;
    let reconciler = Arc::new(Reconciler::new(registry));

    let url = event_server(
        vec![
            r#"{"t":"event","e":"changed","r":"sensors","id":"1","state":{"temperature":1700}}"#
                .to_string(),
            "{this is not json".to_string(),
            r#"{"t":"event","e":"changed","r":"sensors","id":"1","state":{"temperature":1600}}"#
                .to_string(),
        ],
        false,
    )
    .await;

    let (stream, _) = connect_async(url.as_str()).await.unwrap();
    let exit = listen(stream, reconciler.clone(), CancellationToken::new(), true).await;

    assert!(matches!(exit, ListenExit::MalformedEnvelope(_)), "{exit:?}");
    // the frame before the broken one was applied, the one after was not
    assert_eq!(temperature_of(&reconciler, 1), Some(1700));
}

#[tokio::test]
async fn broken_config_does_not_end_the_stream() {
    // ---
    let gateway = common::fake_gateway().await;
    let (registry, _) = common::loaded_registry(gateway).await;
    let reconciler = Arc::new(Reconciler::new(registry.clone()));

    let url = event_server(
        vec![
            r#"{"t":"event","e":"changed","r":"sensors","id":"1","config":{"battery":80,"on":null}}"#
                .to_string(),
            r#"{"t":"event","e":"added","r":"sensors","id":"4","sensor":{"name":"New"}}"#
                .to_string(),
            r#"{"t":"event","e":"changed","r":"sensors","id":"1","state":{"temperature":2240}}"#
                .to_string(),
        ],
        true,
    )
    .await;

    let (stream, _) = connect_async(url.as_str()).await.unwrap();
    let exit = listen(stream, reconciler.clone(), CancellationToken::new(), false).await;

    assert_eq!(exit, ListenExit::Closed);
    assert_eq!(temperature_of(&reconciler, 1), Some(2240));
    assert!(registry.get(1).unwrap().on);
}

#[tokio::test]
async fn shutdown_performs_close_handshake() {
    // ---
    let gateway = common::fake_gateway().await;
    let (registry, _) = common::loaded_registry(gateway).await;
    let reconciler = Arc::new(Reconciler::new(registry));

    let url = event_server(Vec::new(), false).await;
    let (stream, _) = connect_async(url.as_str()).await.unwrap();

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let exit = listen(stream, reconciler, shutdown, false).await;

    assert_eq!(exit, ListenExit::Shutdown);
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "shutdown took {:?}",
        started.elapsed()
    );
}
