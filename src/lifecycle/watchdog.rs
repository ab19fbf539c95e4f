//! Forced-exit watchdog.
//!
//! # Responsibilities
//! - Race a second termination event against the overall shutdown deadline
//! - Terminate the process abnormally when either wins
//!
//! # Design Decisions
//! - Armed once, at the first termination event; never disarmed. The
//!   graceful path ends it by letting the process exit
//! - Process exit goes through the [`Terminator`] seam so tests can observe it

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::lifecycle::shutdown::{next_event, ShutdownEvent};
use crate::observability::metrics;

/// Exit status used when the watchdog cuts shutdown short.
pub const FORCED_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedExit {
    /// Another termination event arrived while shutting down.
    SecondSignal(ShutdownEvent),
    /// The forced-exit deadline elapsed.
    DeadlineElapsed,
}

impl ForcedExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForcedExit::SecondSignal(_) => "second_signal",
            ForcedExit::DeadlineElapsed => "deadline_elapsed",
        }
    }
}

impl std::fmt::Display for ForcedExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForcedExit::SecondSignal(event) => write!(f, "second termination event ({})", event),
            ForcedExit::DeadlineElapsed => f.write_str("shutdown deadline elapsed"),
        }
    }
}

/// Terminal action taken when graceful shutdown is abandoned.
pub trait Terminator: Send + Sync + 'static {
    fn terminate(&self, code: i32, reason: ForcedExit);
}

/// Exits the process immediately, skipping destructors and remaining shutdown steps.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl Terminator for ProcessExit {
    fn terminate(&self, code: i32, reason: ForcedExit) {
        tracing::error!(code, %reason, "Forcing process exit");
        std::process::exit(code);
    }
}

pub struct Watchdog {
    timeout: Duration,
    terminator: Arc<dyn Terminator>,
}

impl Watchdog {
    pub fn new(timeout: Duration, terminator: Arc<dyn Terminator>) -> Self {
        Self {
            timeout,
            terminator,
        }
    }

    /// Start the race. `events` must already have consumed the event that
    /// started shutdown; the deadline counts from this call.
    pub fn arm(self, mut events: broadcast::Receiver<ShutdownEvent>) -> JoinHandle<ForcedExit> {
        let deadline = Instant::now() + self.timeout;
        tracing::debug!(timeout = ?self.timeout, "Forced-exit watchdog armed");

        tokio::spawn(async move {
            let reason = tokio::select! {
                event = next_event(&mut events) => ForcedExit::SecondSignal(event),
                _ = tokio::time::sleep_until(deadline) => ForcedExit::DeadlineElapsed,
            };

            tracing::error!(%reason, timeout = ?self.timeout, "Graceful shutdown abandoned");
            metrics::record_forced_exit(reason.as_str());
            self.terminator.terminate(FORCED_EXIT_CODE, reason);
            reason
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::shutdown::Shutdown;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(i32, ForcedExit)>>);

    impl Terminator for Recorder {
        fn terminate(&self, code: i32, reason: ForcedExit) {
            self.0.lock().unwrap().push((code, reason));
        }
    }

    #[tokio::test]
    async fn deadline_forces_exit() {
        let recorder = Arc::new(Recorder::default());
        let shutdown = Shutdown::new();

        let started = std::time::Instant::now();
        let reason = Watchdog::new(Duration::from_millis(100), recorder.clone())
            .arm(shutdown.subscribe())
            .await
            .unwrap();

        assert_eq!(reason, ForcedExit::DeadlineElapsed);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![(FORCED_EXIT_CODE, ForcedExit::DeadlineElapsed)]
        );
    }

    #[tokio::test]
    async fn second_signal_forces_exit_immediately() {
        let recorder = Arc::new(Recorder::default());
        let shutdown = Shutdown::new();
        let handle = Watchdog::new(Duration::from_secs(30), recorder.clone()).arm(shutdown.subscribe());

        shutdown.notify(ShutdownEvent::Terminate);
        let reason = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reason, ForcedExit::SecondSignal(ShutdownEvent::Terminate));
        assert_eq!(recorder.0.lock().unwrap()[0].0, FORCED_EXIT_CODE);
    }

    #[tokio::test]
    async fn first_event_does_not_fire_the_watchdog() {
        let recorder = Arc::new(Recorder::default());
        let shutdown = Shutdown::new();
        let mut events = shutdown.subscribe();

        shutdown.trigger();
        assert_eq!(next_event(&mut events).await, ShutdownEvent::Requested);

        let mut handle = Watchdog::new(Duration::from_secs(30), recorder.clone()).arm(events);
        assert!(tokio::time::timeout(Duration::from_millis(100), &mut handle)
            .await
            .is_err());
        assert!(recorder.0.lock().unwrap().is_empty());
        handle.abort();
    }

    #[test]
    fn reasons_have_metric_labels() {
        assert_eq!(ForcedExit::DeadlineElapsed.as_str(), "deadline_elapsed");
        assert_eq!(
            ForcedExit::SecondSignal(ShutdownEvent::Interrupt).to_string(),
            "second termination event (interrupt)"
        );
    }
}
