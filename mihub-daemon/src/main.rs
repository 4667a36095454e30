// mihub daemon - Standalone Xiaomi gateway bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # mihub daemon
//!
//! Runs the bridge against a scripted gateway scenario and exposes device
//! state, actions and Prometheus metrics over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Replay a scenario ten times faster than real time
//! mihub-daemon --scenario scenario.json --speed 10.0
//!
//! # With gateway credentials, on a custom port
//! mihub-daemon --config mihub.json --scenario scenario.json --port 9090
//! ```

mod host;
mod metrics;
mod replay;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use mihub::{Bridge, BridgeConfig, DeviceSnapshot};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use host::DaemonHost;
use metrics::{encode_metrics, record_action, update_discovery_metrics};
use replay::{ReplayConfig, ReplayEngine, ReplayState, Scenario, ScenarioInfo};

/// Xiaomi gateway bridge daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bridge configuration (JSON); defaults to one wildcard gateway
    #[arg(short, long)]
    config: Option<String>,

    /// Scenario to replay (JSON)
    #[arg(long)]
    scenario: String,

    /// Port to listen on
    #[arg(short, long, default_value = "9120")]
    port: u16,

    /// Replay speed multiplier (1.0 = real-time)
    #[arg(short, long, default_value = "1.0")]
    speed: f64,

    /// Loop the replay when it reaches the end
    #[arg(short, long)]
    loop_replay: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Application state shared across handlers.
struct AppState {
    bridge: Arc<Bridge>,
    host: Arc<DaemonHost>,
    replay_state: Option<Arc<ReplayState>>,
    scenario_info: ScenarioInfo,
    start_time: std::time::Instant,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("mihub daemon v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), DaemonError> {
    let config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };

    let scenario = Scenario::from_file(&args.scenario)?;
    let scenario_info = scenario.info();
    info!(
        "Scenario loaded: {} gateways, {} events",
        scenario_info.gateway_count, scenario_info.event_count
    );

    let client = Arc::new(scenario.client()?);
    let host = Arc::new(DaemonHost::new());

    let bridge = {
        let client = client.clone();
        let host = host.clone();
        tokio::task::spawn_blocking(move || Bridge::setup(config, client, host)).await??
    };
    update_discovery_metrics(bridge.discovery());
    let bridge = Arc::new(bridge);

    // Start replay in background
    let replay_config = ReplayConfig {
        speed: args.speed,
        loop_replay: args.loop_replay,
        ..Default::default()
    };
    let replay = match ReplayEngine::new(replay_config, client, bridge.clone(), scenario.events) {
        Ok(engine) => {
            let engine = Arc::new(engine);
            let runner = engine.clone();
            tokio::spawn(async move {
                runner.run().await;
            });
            Some(engine)
        }
        Err(e) => {
            info!("Replay disabled: {}", e);
            None
        }
    };
    let replay_state = replay.as_ref().map(|engine| engine.state());

    let state = Arc::new(AppState {
        bridge: bridge.clone(),
        host: host.clone(),
        replay_state,
        scenario_info,
        start_time: std::time::Instant::now(),
    });

    // Build router
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .route("/devices", get(devices_handler))
        .route("/actions/:action", post(action_handler))
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(host, replay))
        .await?;

    bridge.shutdown();
    info!("Bridge stopped");
    Ok(())
}

/// Resolves on Ctrl-C after stopping the replay and firing the host's stop
/// hooks.
async fn shutdown_signal(host: Arc<DaemonHost>, replay: Option<Arc<ReplayEngine>>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        return;
    }
    info!("Shutdown requested");
    if let Some(engine) = replay {
        engine.stop();
    }
    host.shutdown();
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>mihub</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }
        h1 { color: #2c3e50; }
        a { color: #3498db; text-decoration: none; }
        a:hover { text-decoration: underline; }
        .endpoints { background: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0; }
        .endpoint { margin: 10px 0; }
        code { background: #e9ecef; padding: 2px 6px; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>mihub</h1>
    <p>Xiaomi gateway bridge.</p>

    <div class="endpoints">
        <h2>Endpoints</h2>
        <div class="endpoint"><a href="/metrics">/metrics</a> - Prometheus metrics</div>
        <div class="endpoint"><a href="/health">/health</a> - Health check</div>
        <div class="endpoint"><a href="/ready">/ready</a> - Readiness check</div>
        <div class="endpoint"><a href="/status">/status</a> - Status information (JSON)</div>
        <div class="endpoint"><a href="/devices">/devices</a> - Device snapshots (JSON)</div>
        <div class="endpoint"><code>POST /actions/play_ringtone</code> - <code>{"gw_sid": "...", "ringtone_id": 2, "ringtone_vol": 50}</code></div>
        <div class="endpoint"><code>POST /actions/stop_ringtone</code> - <code>{"gw_sid": "..."}</code></div>
    </div>

    <h2>Metrics</h2>
    <ul>
        <li><code>mihub_gateways_discovered</code> - Gateways registered after discovery</li>
        <li><code>mihub_devices_registered</code> - Device handlers per platform</li>
        <li><code>mihub_push_events_total</code> - Push events ingested</li>
        <li><code>mihub_state_changes_total</code> - State changes per platform</li>
        <li><code>mihub_parse_errors_total</code> - Rejected report fields</li>
        <li><code>mihub_battery_level_percent</code> - Battery level per device</li>
        <li><code>mihub_action_invocations_total</code> - Actions per outcome</li>
    </ul>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = encode_metrics();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.bridge.is_shut_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Stopping");
    }
    (StatusCode::OK, "Ready")
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    gateways: Vec<GatewayStatus>,
    device_count: usize,
    actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replay: Option<ReplayStatus>,
}

#[derive(Serialize)]
struct GatewayStatus {
    sid: String,
    address: String,
    has_key: bool,
    devices: usize,
}

/// Replay status information.
#[derive(Serialize)]
struct ReplayStatus {
    running: bool,
    position: usize,
    total_events: usize,
    progress_percent: f64,
    duration_ms: u64,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let replay = state.replay_state.as_ref().map(|replay_state| {
        let position = replay_state.position.load(Ordering::SeqCst);
        let total = replay_state.total_events.load(Ordering::SeqCst);
        let progress = if total > 0 {
            (position as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        ReplayStatus {
            running: replay_state.running.load(Ordering::SeqCst),
            position,
            total_events: total,
            progress_percent: progress,
            duration_ms: state.scenario_info.duration_ms,
        }
    });

    let gateways = state
        .bridge
        .registry()
        .connections()
        .iter()
        .map(|c| GatewayStatus {
            sid: c.sid().to_string(),
            address: c.address().to_string(),
            has_key: c.has_key(),
            devices: c.device_count(),
        })
        .collect();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        gateways,
        device_count: state.host.device_count(),
        actions: state.host.actions(),
        replay,
    })
}

/// Devices handler - latest snapshot of every device.
async fn devices_handler(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceSnapshot>> {
    Json(state.host.devices())
}

#[derive(Serialize)]
struct ActionResponse {
    action: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Action handler - forwards the call data to the bridge.
///
/// Always answers 202; failures are logged and reported in the body.
async fn action_handler(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    body: Option<Json<Value>>,
) -> impl IntoResponse {
    let data = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let outcome = state.bridge.invoke(&action, &data);
    record_action(&action, outcome.label());

    let error = match &outcome {
        mihub::ActionOutcome::Failed(e) => Some(e.to_string()),
        mihub::ActionOutcome::Written => None,
    };
    (
        StatusCode::ACCEPTED,
        Json(ActionResponse {
            action,
            outcome: outcome.label(),
            error,
        }),
    )
}

/// Errors that stop the daemon.
#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(#[from] mihub::ConfigError),

    #[error("Bridge setup failed: {0}")]
    Bridge(#[from] mihub::BridgeError),

    #[error("Scenario error: {0}")]
    Replay(#[from] replay::ReplayError),

    #[error("Setup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
