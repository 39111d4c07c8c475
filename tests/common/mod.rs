#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use deconz_exporter::{GatewayClient, SensorMetrics, SensorRegistry};

pub const TOKEN: &str = "TESTTOKEN";

/// Sensor document used by the fake gateway.
pub fn sensors_document() -> Value {
    json!({
        "1": {
            "config": {"battery": 80, "offset": 0, "on": true, "reachable": true},
            "ep": 1,
            "etag": "6e3cf5cf4ce1a0d2bd9a3c7f7b1a58f0",
            "manufacturername": "LUMI",
            "modelid": "lumi.weather",
            "name": "Living room",
            "mode": 1,
            "state": {"temperature": 2150, "lastupdated": "2023-01-01T12:00:00"},
            "swversion": "20191205",
            "type": "ZHATemperature",
            "uniqueid": "00:15:8d:00:01:02:03:04-01-0402"
        },
        "2": {
            "config": {"battery": null, "on": true, "reachable": true},
            "manufacturername": "Philips",
            "modelid": "PHDL00",
            "name": "Daylight",
            "state": {"daylight": true, "dark": false, "status": 170, "lastupdated": "none"},
            "type": "Daylight",
            "uniqueid": "00:21:2e:ff:ff:00:00:00-01"
        },
        "3": {
            "config": {"battery": 100, "on": true, "reachable": true},
            "manufacturername": "IKEA of Sweden",
            "modelid": "TRADFRI remote control",
            "name": "Remote",
            "state": {"buttonevent": 1002, "lastupdated": "2023-01-01T10:00:00"},
            "type": "ZHASwitch",
            "uniqueid": "00:0b:57:ff:fe:00:00:00-01-1000"
        }
    })
}

pub fn config_document() -> Value {
    json!({
        "name": "Phoscon-GW",
        "apiversion": "1.16.0",
        "swversion": "2.21.2",
        "bridgeid": "00212EFFFF000000",
        "websocketport": 8443,
        "zigbeechannel": 15
    })
}

/// Serve `app` on an ephemeral local port.
pub async fn serve(app: Router) -> SocketAddr {
    // ---
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A stand-in for the gateway's REST API. Any other token gets a 403.
pub async fn fake_gateway() -> SocketAddr {
    // ---
    let app = Router::new()
        .route(
            &format!("/api/{TOKEN}/sensors"),
            get(|| async { Json(sensors_document()) }),
        )
        .route(
            &format!("/api/{TOKEN}/config"),
            get(|| async { Json(config_document()) }),
        )
        .fallback(|| async {
            (
                StatusCode::FORBIDDEN,
                Json(json!([{"error": {"type": 1, "description": "unauthorized user"}}])),
            )
        });
    serve(app).await
}

/// Registry and metrics loaded from the fake gateway's snapshot.
pub async fn loaded_registry(addr: SocketAddr) -> (Arc<SensorRegistry>, Arc<SensorMetrics>) {
    // ---
    let client = GatewayClient::new("127.0.0.1", addr.port(), TOKEN);
    let metrics = Arc::new(SensorMetrics::new());
    let registry = Arc::new(SensorRegistry::new(metrics.clone()));
    let snapshot = client.fetch_sensors().await.unwrap();
    registry.load_snapshot(&snapshot);
    (registry, metrics)
}
