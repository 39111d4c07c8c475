//! Application entry point for the `deconz-exporter` service.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Reading the gateway config and the bulk sensor snapshot
//! - Mounting all HTTP routes via the `routes` gateway
//! - Following the gateway's event stream until Ctrl-C or connection loss
//!
//! # Environment Variables
//! - `DECONZ_HOST`, `DECONZ_PORT`, `DECONZ_TOKEN` (**required**) – gateway access
//! - `DECONZ_APP_PORT` (optional) – HTTP port for `/metrics` (default: 8080)
//! - `DECONZ_WS_PORT` (optional) – event stream port override
//! - `DECONZ_RECONNECT_SECS` (optional) – reconnect delay, 0 exits instead
//! - `DECONZ_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `DECONZ_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use deconz_exporter::{
    config, listen, routes, Config, GatewayClient, ListenExit, Reconciler, SensorMetrics,
    SensorRegistry,
};

type EventStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Prometheus exporter for deCONZ sensors.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Verbose logging
    #[arg(long)]
    verbose: bool,
}

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut cfg = config::load_from_env()?;
    cfg.verbose |= cli.verbose;
    cfg.log_config();

    let client = GatewayClient::new(&cfg.host, cfg.port, &cfg.token);
    let metrics = Arc::new(SensorMetrics::new());
    let registry = Arc::new(SensorRegistry::new(metrics.clone()));

    let gateway = client
        .fetch_config()
        .await
        .context("failed load config")?;
    info!(
        "Connected to gateway '{}' (api {}, firmware {})",
        gateway.name, gateway.api_version, gateway.sw_version
    );
    metrics.set_gateway_info(&gateway);

    let ws_port = cfg
        .ws_port
        .or(gateway.websocket_port)
        .ok_or_else(|| anyhow!("gateway reports no websocket port, set DECONZ_WS_PORT"))?;

    let snapshot = client
        .fetch_sensors()
        .await
        .context("failed init sensors")?;
    registry.load_snapshot(&snapshot);
    if cfg.verbose {
        for (id, sensor) in registry.list() {
            info!("sensor {}: {:?}", id, sensor);
        }
    }

    let shutdown = CancellationToken::new();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => interrupt.cancel(),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    // Build app from routes gateway
    let app = routes::router(registry.clone(), metrics.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.app_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    let reconciler = Arc::new(Reconciler::new(registry));
    let result = follow_events(&cfg, &client, ws_port, reconciler, &metrics, &shutdown).await;

    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server failed: {}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
    }

    result
}

// ---

/// Follow the event stream, reconnecting if configured to.
///
/// Failing to dial the first time is fatal. Without a reconnect delay a lost
/// stream ends the process with an error so a supervisor can restart it.
async fn follow_events(
    cfg: &Config,
    client: &GatewayClient,
    ws_port: u16,
    reconciler: Arc<Reconciler>,
    metrics: &SensorMetrics,
    shutdown: &CancellationToken,
) -> Result<()> {
    // ---
    let url = client.websocket_url(ws_port);
    info!("connecting to {}", url);
    let (mut stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("dial {}", url))?;

    loop {
        let exit = listen(stream, reconciler.clone(), shutdown.clone(), cfg.verbose).await;
        if exit == ListenExit::Shutdown {
            info!("event stream shut down");
            return Ok(());
        }
        if cfg.reconnect_secs == 0 {
            bail!("event stream lost: {:?}", exit);
        }

        warn!(
            "event stream lost ({:?}), reconnecting in {}s",
            exit, cfg.reconnect_secs
        );
        let delay = Duration::from_secs(cfg.reconnect_secs);
        stream = match reconnect(&url, client, &reconciler, metrics, shutdown, delay).await {
            Some(stream) => stream,
            None => return Ok(()),
        };
    }
}

/// Dial again and reload the snapshot, retrying until it works or shutdown
/// is requested.
///
/// The stream is opened before the snapshot is fetched so no event falls in
/// between; buffered events are applied once the caller resumes listening.
async fn reconnect(
    url: &str,
    client: &GatewayClient,
    reconciler: &Reconciler,
    metrics: &SensorMetrics,
    shutdown: &CancellationToken,
    delay: Duration,
) -> Option<EventStream> {
    // ---
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => return None,
        }

        let stream = match connect_async(url).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("dial {}: {}", url, e);
                continue;
            }
        };

        match client.fetch_sensors().await {
            Ok(snapshot) => {
                reconciler.registry().load_snapshot(&snapshot);
                info!("reconnected to {}", url);
                return Some(stream);
            }
            Err(e) => {
                metrics.inc_errors();
                warn!("failed to retrieve data: {}", e);
            }
        }
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `DECONZ_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `DECONZ_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("DECONZ_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to DECONZ_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("DECONZ_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},hyper=warn,reqwest=warn,tungstenite=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
