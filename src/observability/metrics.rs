//! Metrics collection and exposition.
//!
//! # Metrics
//! - `shutdown_phase_duration_seconds` (histogram): time spent per shutdown phase
//! - `shutdown_listener_stops_total` (counter): listener stops by outcome
//! - `shutdown_callbacks_total` (counter): callback invocations by outcome
//! - `shutdown_rejected_requests_total` (counter): requests answered 503 while draining
//! - `shutdown_forced_exits_total` (counter): watchdog firings by reason

use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder.
///
/// The returned handle renders the scrape payload; the binary serves it on the
/// admin listener.
pub fn install() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("Prometheus recorder installed");
    Ok(handle)
}

pub fn record_phase(phase: &'static str, elapsed: Duration) {
    metrics::histogram!("shutdown_phase_duration_seconds", "phase" => phase)
        .record(elapsed.as_secs_f64());
}

pub fn record_listener_stop(listener: &str, outcome: &'static str) {
    metrics::counter!(
        "shutdown_listener_stops_total",
        "listener" => listener.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_callback(callback: &str, outcome: &'static str) {
    metrics::counter!(
        "shutdown_callbacks_total",
        "callback" => callback.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_rejected_request(listener: &str) {
    metrics::counter!("shutdown_rejected_requests_total", "listener" => listener.to_string())
        .increment(1);
}

pub fn record_forced_exit(reason: &'static str) {
    metrics::counter!("shutdown_forced_exits_total", "reason" => reason).increment(1);
}
