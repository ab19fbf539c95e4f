//! Shutdown coordination for the application.

use tokio::sync::broadcast;

/// Why shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Programmatic trigger through [`Shutdown::trigger`].
    Requested,
}

impl ShutdownEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownEvent::Interrupt => "interrupt",
            ShutdownEvent::Terminate => "terminate",
            ShutdownEvent::Requested => "requested",
        }
    }
}

impl std::fmt::Display for ShutdownEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bus carrying termination events.
///
/// The orchestrator waits for the first event; the watchdog treats any later
/// event as a demand for immediate exit. Cloning shares the same bus.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<ShutdownEvent>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { tx }
    }

    /// Subscribe to termination events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownEvent> {
        self.tx.subscribe()
    }

    /// Request shutdown programmatically.
    pub fn trigger(&self) {
        self.notify(ShutdownEvent::Requested);
    }

    /// Publish a termination event.
    pub fn notify(&self, event: ShutdownEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(%event, "Shutdown event sent with no subscribers");
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive the next termination event, skipping over lag.
///
/// Pends forever once the bus is closed: no further event can arrive.
pub(crate) async fn next_event(events: &mut broadcast::Receiver<ShutdownEvent>) -> ShutdownEvent {
    loop {
        match events.recv().await {
            Ok(event) => return event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Shutdown events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
