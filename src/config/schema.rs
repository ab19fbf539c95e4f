//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the application.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the application.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listeners to run concurrently.
    pub listeners: Vec<ListenerConfig>,

    /// Shutdown timing policy.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// A single named network listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Listener identity used in logs and metrics (e.g. "business", "admin").
    pub name: String,

    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Per-request timeout applied by the listener's middleware stack.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ListenerConfig {
    pub fn new(name: impl Into<String>, bind_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind_address: bind_address.into(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// The listener set of the reference deployment: a business API and an admin API.
pub fn default_listeners() -> Vec<ListenerConfig> {
    vec![
        ListenerConfig::new("business", "127.0.0.1:8080"),
        ListenerConfig::new("admin", "localhost:8081"),
    ]
}

/// Shutdown timing policy. Immutable once the application is built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Fixed wait after rejecting new requests, letting admitted requests finish.
    pub drain_wait_ms: u64,

    /// Budget each shutdown callback gets, measured from its own start.
    pub callback_timeout_ms: u64,

    /// Forced-exit deadline, measured from the first termination event.
    pub shutdown_timeout_ms: u64,

    /// Deadline handed to each listener's stop before stragglers are force-closed.
    pub listener_stop_timeout_ms: u64,

    /// Install SIGINT/SIGTERM handlers that feed the shutdown bus.
    pub handle_signals: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_wait_ms: 10_000,
            callback_timeout_ms: 3_000,
            shutdown_timeout_ms: 30_000,
            listener_stop_timeout_ms: 5_000,
            handle_signals: true,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_wait(&self) -> Duration {
        Duration::from_millis(self.drain_wait_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn listener_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_stop_timeout_ms)
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Install the Prometheus recorder and expose `/metrics` on the admin listener.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "graceful_app=info,tower_http=info".to_string(),
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl AppConfig {
    /// Configuration of the reference deployment with default timings.
    pub fn reference() -> Self {
        Self {
            listeners: default_listeners(),
            ..Self::default()
        }
    }
}
