//! Application orchestrator: runs the listeners and drives graceful shutdown.
//!
//! # Shutdown sequence
//! ```text
//! Running
//!   → RejectingNewRequests   every listener answers 503
//!   → Draining               fixed wait for admitted requests
//!   → StoppingListeners      concurrent stops, barrier
//!   → RunningCallbacks       concurrent callbacks, barrier
//!   → ReleasingResources     release hooks, in order
//!   → Terminated
//! ```
//! Phases only move forward. The forced-exit watchdog runs alongside from the
//! first termination event until the process exits.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::ShutdownConfig;
use crate::lifecycle::callbacks::{CallbackRegistry, CallbackSummary, ShutdownCallback};
use crate::lifecycle::shutdown::{next_event, Shutdown, ShutdownEvent};
use crate::lifecycle::signals;
use crate::lifecycle::watchdog::{ProcessExit, Terminator, Watchdog};
use crate::net::Listener;
use crate::observability::metrics;

/// Synchronous release of a resource held for the application's lifetime.
pub type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    RejectingNewRequests,
    Draining,
    StoppingListeners,
    RunningCallbacks,
    ReleasingResources,
    Terminated,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Running => "running",
            Phase::RejectingNewRequests => "rejecting_new_requests",
            Phase::Draining => "draining",
            Phase::StoppingListeners => "stopping_listeners",
            Phase::RunningCallbacks => "running_callbacks",
            Phase::ReleasingResources => "releasing_resources",
            Phase::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("shutdown already in progress (phase: {0})")]
    AlreadyShuttingDown(Phase),
}

/// Everything the orchestrator needs besides its listeners.
pub struct AppOptions {
    pub shutdown: ShutdownConfig,
    pub callbacks: CallbackRegistry,
    pub release_hooks: Vec<(String, ReleaseHook)>,
    pub terminator: Arc<dyn Terminator>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            shutdown: ShutdownConfig::default(),
            callbacks: CallbackRegistry::new(),
            release_hooks: Vec::new(),
            terminator: Arc::new(ProcessExit),
        }
    }
}

impl AppOptions {
    pub fn with_shutdown(mut self, shutdown: ShutdownConfig) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_callback(mut self, name: &str, callback: impl ShutdownCallback) -> Self {
        self.callbacks.register(name, callback);
        self
    }

    pub fn with_release_hook(
        mut self,
        name: impl Into<String>,
        hook: impl FnOnce() + Send + 'static,
    ) -> Self {
        self.release_hooks.push((name.into(), Box::new(hook)));
        self
    }

    pub fn with_terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = terminator;
        self
    }
}

/// What the graceful sequence did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub trigger: ShutdownEvent,
    pub listeners_stopped: usize,
    pub listener_stop_failures: usize,
    pub callbacks: CallbackSummary,
    pub resources_released: usize,
    pub elapsed: Duration,
}

pub struct App {
    listeners: Vec<Arc<Listener>>,
    callbacks: CallbackRegistry,
    release_hooks: Mutex<Vec<(String, ReleaseHook)>>,
    config: ShutdownConfig,
    terminator: Arc<dyn Terminator>,
    shutdown: Shutdown,
    /// Subscribed at construction so a trigger sent before serving starts is kept.
    events: Mutex<Option<broadcast::Receiver<ShutdownEvent>>>,
    phase: watch::Sender<Phase>,
}

impl App {
    pub fn new(listeners: Vec<Listener>, options: AppOptions) -> Self {
        let shutdown = Shutdown::new();
        Self {
            listeners: listeners.into_iter().map(Arc::new).collect(),
            callbacks: options.callbacks,
            release_hooks: Mutex::new(options.release_hooks),
            config: options.shutdown,
            terminator: options.terminator,
            events: Mutex::new(Some(shutdown.subscribe())),
            shutdown,
            phase: watch::channel(Phase::Running).0,
        }
    }

    pub fn listeners(&self) -> &[Arc<Listener>] {
        &self.listeners
    }

    pub fn listener(&self, name: &str) -> Option<&Arc<Listener>> {
        self.listeners.iter().find(|l| l.name() == name)
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Handle for triggering shutdown without an OS signal.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn current_phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Start every listener, wait for a termination event, then shut down.
    ///
    /// The forced-exit watchdog stays armed after this returns; the caller is
    /// expected to let the process exit.
    pub async fn start_and_serve(&self) -> Result<ShutdownReport, AppError> {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| self.shutdown.subscribe());

        if self.config.handle_signals {
            if let Err(e) = signals::spawn_forwarder(self.shutdown.clone()) {
                tracing::error!(error = %e, "Failed to install signal handlers");
            }
        }

        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            tokio::spawn(async move {
                match listener.start().await {
                    Ok(()) => tracing::info!(listener = %listener.name(), "Listener closed"),
                    Err(e) => tracing::error!(
                        listener = %listener.name(),
                        error = %e,
                        "Listener exited unexpectedly"
                    ),
                }
            });
        }
        tracing::info!(listeners = self.listeners.len(), "Application started");

        let trigger = next_event(&mut events).await;
        tracing::info!(%trigger, "Shutdown initiated");

        Watchdog::new(self.config.shutdown_timeout(), Arc::clone(&self.terminator)).arm(events);

        self.run_shutdown(trigger).await
    }

    /// Run the graceful sequence now, without the watchdog.
    pub async fn shutdown(&self) -> Result<ShutdownReport, AppError> {
        self.run_shutdown(ShutdownEvent::Requested).await
    }

    async fn run_shutdown(&self, trigger: ShutdownEvent) -> Result<ShutdownReport, AppError> {
        let started = Instant::now();
        self.begin()?;
        let mut phase_started = started;

        for listener in &self.listeners {
            listener.reject_requests();
        }

        phase_started = self.advance(Phase::Draining, phase_started);
        tracing::info!(drain_wait = ?self.config.drain_wait(), "Waiting for in-flight requests");
        tokio::time::sleep(self.config.drain_wait()).await;

        phase_started = self.advance(Phase::StoppingListeners, phase_started);
        let (listeners_stopped, listener_stop_failures) = self.stop_listeners().await;

        phase_started = self.advance(Phase::RunningCallbacks, phase_started);
        let callbacks = self.callbacks.run_all(self.config.callback_timeout()).await;

        phase_started = self.advance(Phase::ReleasingResources, phase_started);
        let resources_released = self.release_resources().await;

        self.advance(Phase::Terminated, phase_started);

        let report = ShutdownReport {
            trigger,
            listeners_stopped,
            listener_stop_failures,
            callbacks,
            resources_released,
            elapsed: started.elapsed(),
        };
        tracing::info!(?report, "Application shut down");
        Ok(report)
    }

    /// Leave `Running`. Fails if a shutdown already began.
    fn begin(&self) -> Result<(), AppError> {
        let mut current = Phase::Running;
        let began = self.phase.send_if_modified(|phase| {
            if *phase == Phase::Running {
                *phase = Phase::RejectingNewRequests;
                true
            } else {
                current = *phase;
                false
            }
        });
        if !began {
            return Err(AppError::AlreadyShuttingDown(current));
        }
        tracing::info!(phase = %Phase::RejectingNewRequests, "Shutdown phase");
        Ok(())
    }

    fn advance(&self, next: Phase, phase_started: Instant) -> Instant {
        let previous = self.phase.send_replace(next);
        metrics::record_phase(previous.as_str(), phase_started.elapsed());
        tracing::info!(phase = %next, "Shutdown phase");
        Instant::now()
    }

    async fn stop_listeners(&self) -> (usize, usize) {
        let timeout = self.config.listener_stop_timeout();
        let mut stops = JoinSet::new();
        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            stops.spawn(async move {
                let result = listener.stop(timeout).await;
                (listener, result)
            });
        }

        let mut stopped = 0;
        let mut failed = 0;
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((listener, Ok(()))) => {
                    stopped += 1;
                    metrics::record_listener_stop(listener.name(), "stopped");
                }
                Ok((listener, Err(e))) => {
                    failed += 1;
                    metrics::record_listener_stop(listener.name(), "failed");
                    tracing::warn!(listener = %listener.name(), error = %e, "Failed to stop listener");
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(error = %e, "Listener stop task panicked");
                }
            }
        }
        (stopped, failed)
    }

    async fn release_resources(&self) -> usize {
        let hooks = std::mem::take(
            &mut *self
                .release_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let mut released = 0;
        for (name, hook) in hooks {
            tracing::debug!(resource = %name, "Releasing resource");
            match tokio::task::spawn_blocking(hook).await {
                Ok(()) => released += 1,
                Err(e) => tracing::error!(resource = %name, error = %e, "Release hook panicked"),
            }
        }
        released
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("listeners", &self.listeners)
            .field("callbacks", &self.callbacks)
            .field("config", &self.config)
            .field("phase", &self.current_phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> ShutdownConfig {
        ShutdownConfig {
            drain_wait_ms: 0,
            handle_signals: false,
            ..ShutdownConfig::default()
        }
    }

    #[tokio::test]
    async fn shutdown_walks_every_phase_in_order() {
        let app = App::new(
            vec![Listener::new("business", "127.0.0.1:0")],
            AppOptions::default().with_shutdown(quiet_config()),
        );
        let mut phases = app.phase();
        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                let phase = *phases.borrow_and_update();
                seen.push(phase);
                if phase == Phase::Terminated || phases.changed().await.is_err() {
                    break;
                }
            }
            seen
        });

        let report = app.shutdown().await.unwrap();
        assert_eq!(report.trigger, ShutdownEvent::Requested);
        assert_eq!(app.current_phase(), Phase::Terminated);

        let seen = observer.await.unwrap();
        assert_eq!(seen.last(), Some(&Phase::Terminated));
        let mut sorted = seen.clone();
        sorted.sort_by_key(|p| *p as u8);
        assert_eq!(seen, sorted);
    }

    #[tokio::test]
    async fn second_shutdown_is_refused() {
        let app = App::new(Vec::new(), AppOptions::default().with_shutdown(quiet_config()));
        app.shutdown().await.unwrap();

        let err = app.shutdown().await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyShuttingDown(Phase::Terminated)));
    }

    #[tokio::test]
    async fn release_hooks_run_once_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, second) = (order.clone(), order.clone());
        let app = App::new(
            Vec::new(),
            AppOptions::default()
                .with_shutdown(quiet_config())
                .with_release_hook("db", move || first.lock().unwrap().push("db"))
                .with_release_hook("cache", move || second.lock().unwrap().push("cache")),
        );

        let report = app.shutdown().await.unwrap();
        assert_eq!(report.resources_released, 2);
        assert_eq!(*order.lock().unwrap(), vec!["db", "cache"]);
    }

    #[tokio::test]
    async fn never_started_listener_counts_as_stopped() {
        let app = App::new(
            vec![Listener::new("admin", "127.0.0.1:0")],
            AppOptions::default().with_shutdown(quiet_config()),
        );
        let report = app.shutdown().await.unwrap();
        assert_eq!(report.listeners_stopped, 1);
        assert_eq!(report.listener_stop_failures, 0);
        assert!(app.listener("admin").unwrap().is_rejecting());
    }

    #[tokio::test]
    async fn trigger_before_serving_is_not_lost() {
        let app = App::new(
            vec![Listener::new("business", "127.0.0.1:0")],
            AppOptions::default().with_shutdown(quiet_config()),
        );
        app.shutdown_handle().trigger();

        let report = tokio::time::timeout(Duration::from_secs(2), app.start_and_serve())
            .await
            .expect("queued trigger starts shutdown")
            .unwrap();
        assert_eq!(report.trigger, ShutdownEvent::Requested);
        assert_eq!(report.listener_stop_failures, 0);
        assert_eq!(app.current_phase(), Phase::Terminated);
    }
}
