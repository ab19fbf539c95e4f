//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use graceful_app::config::ShutdownConfig;
use graceful_app::lifecycle::{App, AppError, ForcedExit, Phase, ShutdownReport, Terminator};
use tokio::task::JoinHandle;

/// Records forced exits instead of ending the test process.
#[derive(Default)]
pub struct RecordingTerminator {
    exits: Mutex<Vec<(i32, ForcedExit)>>,
}

impl RecordingTerminator {
    pub fn exits(&self) -> Vec<(i32, ForcedExit)> {
        self.exits.lock().unwrap().clone()
    }

    /// Poll until the watchdog fires or `timeout` passes.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Option<(i32, ForcedExit)> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Some(exit) = self.exits().first() {
                return Some(*exit);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, code: i32, reason: ForcedExit) {
        self.exits.lock().unwrap().push((code, reason));
    }
}

/// Shutdown timings small enough for tests, with OS signals left alone.
pub fn fast_config() -> ShutdownConfig {
    ShutdownConfig {
        drain_wait_ms: 0,
        handle_signals: false,
        ..ShutdownConfig::default()
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn spawn_app(app: &Arc<App>) -> JoinHandle<Result<ShutdownReport, AppError>> {
    let app = Arc::clone(app);
    tokio::spawn(async move { app.start_and_serve().await })
}

/// Wait until the named listener is bound and return its address.
pub async fn serving_addr(app: &App, name: &str) -> SocketAddr {
    app.listener(name)
        .expect("listener registered")
        .wait_serving()
        .await
        .expect("listener serving")
}

pub async fn wait_for_phase(app: &App, phase: Phase) {
    let mut phases = app.phase();
    tokio::time::timeout(Duration::from_secs(5), phases.wait_for(|p| *p == phase))
        .await
        .expect("phase reached in time")
        .expect("phase channel open");
}
