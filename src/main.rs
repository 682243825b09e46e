//! InfluxDB line protocol → Prometheus remote-write proxy.
//!
//! # Endpoints
//!
//! - `POST /api/v1/push/influx/write`, `/api/v2/write`, `/write` - line protocol writes
//! - `GET /api/metrics` - recorder snapshot as JSON
//! - `GET /ready` - readiness probe

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};

mod clock;
mod config;
mod handlers;
mod influx;
mod logging;
mod metrics;
mod middleware;
mod pipeline;
mod remote_write;
mod server;

use clock::{Clock, SystemClock};
use config::{Config, WriteConfig};
use remote_write::{HttpWriteClient, WriteClient};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    pub config: WriteConfig,

    /// Where converted batches go.
    pub client: Arc<dyn WriteClient>,

    /// Central metrics engine: the pipeline records, `/api/metrics` reads snapshots.
    pub metrics: Arc<metrics::MetricsCollector>,

    /// "Now" for missing timestamps and the freshness filter.
    pub clock: Arc<dyn Clock>,
}

#[tokio::main]
async fn main() {
    let config = match Config::from_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    logging::init(&config.log_level, config.log_format);

    if let Err(err) = run(config).await {
        error!(error = %err, "proxy exited with error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // ── 1. Remote-write client ───────────────────────────────────
    let client = HttpWriteClient::new(config.remote_write_url.as_str(), config.remote_timeout)?;
    let endpoint = client.endpoint().to_owned();

    // ── 2. Build shared state ────────────────────────────────────
    let state = Arc::new(AppState {
        config: config.write.clone(),
        client: Arc::new(client),
        metrics: Arc::new(metrics::MetricsCollector::new()),
        clock: Arc::new(SystemClock),
    });

    // ── 3. Build Axum router ─────────────────────────────────────
    let app = server::create_router(state);

    // ── 4. Bind & serve ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(config.listen_address).await?;

    info!("influx-write-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("listening on http://{}", listener.local_addr()?);
    info!("remote write: {endpoint}");
    info!(
        max_request_size = config.write.max_request_size,
        max_sample_age_secs = config.write.max_sample_age.as_secs(),
        log_dropped_samples = config.write.log_dropped_samples,
        "write settings"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = ?e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
