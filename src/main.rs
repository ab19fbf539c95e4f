//! Reference deployment: a business API and an admin API shut down together.
//!
//! ```text
//!   SIGINT/SIGTERM ──▶ App ──▶ reject ──▶ drain ──▶ stop listeners ──▶ callbacks ──▶ release
//!                       │
//!                       └──▶ watchdog: second signal / deadline ──▶ exit(1)
//! ```

use std::path::PathBuf;
use std::time::Duration;

use axum::{response::IntoResponse, routing::get, Json};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;

use graceful_app::config::{budget_overrun, load_config, validate_config, AppConfig, ConfigError};
use graceful_app::lifecycle::{App, AppOptions, CallbackContext};
use graceful_app::net::Listener;
use graceful_app::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "graceful-app")]
#[command(about = "Runs the business and admin listeners with graceful shutdown", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults to the built-in reference deployment.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the drain window after rejecting new requests.
    #[arg(long)]
    drain_wait_ms: Option<u64>,

    /// Override the per-callback budget.
    #[arg(long)]
    callback_timeout_ms: Option<u64>,

    /// Override the forced-exit deadline.
    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,
}

impl Cli {
    fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => AppConfig::reference(),
        };

        if let Some(ms) = self.drain_wait_ms {
            config.shutdown.drain_wait_ms = ms;
        }
        if let Some(ms) = self.callback_timeout_ms {
            config.shutdown.callback_timeout_ms = ms;
        }
        if let Some(ms) = self.shutdown_timeout_ms {
            config.shutdown.shutdown_timeout_ms = ms;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().load()?;
    logging::init(&config.observability)?;

    tracing::info!(
        listeners = config.listeners.len(),
        drain_wait_ms = config.shutdown.drain_wait_ms,
        callback_timeout_ms = config.shutdown.callback_timeout_ms,
        shutdown_timeout_ms = config.shutdown.shutdown_timeout_ms,
        "Configuration loaded"
    );
    if let Some(overrun) = budget_overrun(&config.shutdown) {
        tracing::warn!(
            overrun = ?overrun,
            "Worst-case shutdown outlasts the forced-exit deadline; the watchdog may end it"
        );
    }

    let prometheus = if config.observability.metrics_enabled {
        Some(metrics::install()?)
    } else {
        None
    };

    let listeners = config
        .listeners
        .iter()
        .map(|listener| attach_routes(Listener::from_config(listener), prometheus.clone()))
        .collect();

    let options = AppOptions::default()
        .with_shutdown(config.shutdown.clone())
        .with_callback("flush-cache", store_cache_to_db)
        .with_release_hook("local-cache", || {
            std::thread::sleep(Duration::from_millis(500));
            tracing::info!("Local cache released");
        });

    let report = App::new(listeners, options).start_and_serve().await?;

    tracing::info!(elapsed = ?report.elapsed, "Shutdown complete");
    Ok(())
}

fn attach_routes(listener: Listener, prometheus: Option<PrometheusHandle>) -> Listener {
    if listener.name() != "admin" {
        return listener.route("/", get(|| async { "hello" }));
    }

    let listener = listener.route("/status", get(status));
    match prometheus {
        Some(handle) => listener.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ),
        None => listener,
    }
}

async fn status() -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
    }))
}

/// Flush the local cache to the database, giving up when the context expires.
async fn store_cache_to_db(ctx: CallbackContext) {
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tracing::info!("Flushing cache");
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = done_tx.send(());
    });

    tokio::select! {
        _ = ctx.expired() => tracing::warn!(callback = ctx.name(), "Cache flush timed out"),
        _ = done_rx => tracing::info!(callback = ctx.name(), "Cache flushed to DB"),
    }
}
