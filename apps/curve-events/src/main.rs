//! Curve Events - Tail Binary
//!
//! Connects to the curve event feed, subscribes and logs every event until
//! the stream disconnects or the process receives Ctrl+C / SIGTERM.
//!
//! # Environment Variables
//!
//! Required:
//! - `CURVE_EVENTS_URL`: WebSocket endpoint (`ws://` or `wss://`)
//!
//! Subscription (at least one):
//! - `CURVE_EVENTS_CURVES`: comma-separated curve names
//! - `CURVE_EVENTS_AREAS`: comma-separated price areas, e.g. `DE,FR`
//!
//! Optional:
//! - `CURVE_EVENTS_TOKEN`: bearer token sent with the handshake
//! - `CURVE_EVENTS_LAST_ID_FILE`: file persisting the last event id
//! - `CURVE_EVENTS_RECONNECT_ATTEMPTS`: attempts per outage (default: 5)
//! - `CURVE_EVENTS_POLL_SECS`: wait bound per event (default: 30)
//! - `OTEL_ENABLED`: export traces over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: `curve_events=info`)

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, bail};
use curve_events::{
    AttributeFilter, ClientConfig, ConnectOptions, CurveEventClient, Event, Filter, NameFilter,
    init_telemetry,
};
use tokio::signal;

const DEFAULT_POLL: Duration = Duration::from_secs(30);

fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Drives the OTLP exporter and the signal handler; the client runs its own.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("curve-events-main")
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    let _telemetry = rt.block_on(async { init_telemetry() })?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting curve event tail");

    let mut config = ClientConfig::from_env().context("invalid configuration")?;
    if let Ok(token) = std::env::var("CURVE_EVENTS_TOKEN") {
        config = config.with_header("Authorization", format!("Bearer {token}"));
    }
    log_config(&config);

    let filters = filters_from_env();
    if filters.is_empty() {
        bail!("set CURVE_EVENTS_CURVES or CURVE_EVENTS_AREAS to choose what to follow");
    }

    let client = Arc::new(CurveEventClient::new(config)?);
    rt.spawn(await_shutdown(Arc::downgrade(&client)));

    client.connect(ConnectOptions::default())?;
    let confirmed = client.subscribe(filters, None)?;
    tracing::info!(
        filters = confirmed.len(),
        last_id = ?client.last_id().map(|id| id.to_string()),
        "Subscribed"
    );

    let poll = std::env::var("CURVE_EVENTS_POLL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(DEFAULT_POLL, Duration::from_secs);

    for event in client.events(Some(poll)) {
        match event {
            Event::Curve(e) => tracing::info!(
                event_id = %e.event_id,
                curve = %e.curve.name,
                event_type = %e.event_type,
                begin = ?e.begin,
                end = ?e.end,
                num_values = e.num_values,
                "Curve event"
            ),
            Event::Timeout(_) => tracing::debug!("No events within poll interval"),
            Event::Connection(e) => tracing::info!(
                reason = ?e.reason,
                code = ?e.code,
                message = e.message.as_deref().unwrap_or(""),
                "Event stream disconnected"
            ),
        }
    }

    client.close();
    tracing::info!("Curve event tail stopped");
    Ok(())
}

/// Build the subscription from `CURVE_EVENTS_CURVES` and `CURVE_EVENTS_AREAS`.
fn filters_from_env() -> Vec<Filter> {
    let mut filters = Vec::new();
    if let Some(curves) = list_var("CURVE_EVENTS_CURVES") {
        filters.push(NameFilter::new(curves).into());
    }
    if let Some(areas) = list_var("CURVE_EVENTS_AREAS") {
        filters.push(AttributeFilter::new().with_areas(areas).into());
    }
    filters
}

fn list_var(key: &str) -> Option<Vec<String>> {
    let items: Vec<String> = std::env::var(key)
        .ok()?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        url = %config.url,
        reconnect_attempts = config.stream.reconnect_attempts,
        queue_capacity = config.stream.queue_capacity,
        last_id_file = ?config.last_id_file,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for Ctrl+C or SIGTERM, then close the client.
async fn await_shutdown(client: Weak<CurveEventClient>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, closing"),
        () = terminate => tracing::info!("Received SIGTERM, closing"),
    }

    // `close` blocks on the client's runtime.
    let closed = tokio::task::spawn_blocking(move || {
        if let Some(client) = client.upgrade() {
            client.close();
        }
    })
    .await;
    if let Err(e) = closed {
        tracing::warn!(error = %e, "Close task failed");
    }
}
