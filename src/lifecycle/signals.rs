//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT)
//! - Translate every delivered signal into a [`ShutdownEvent`] on the bus
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers stay installed after the first signal: a second SIGTERM/SIGINT
//!   is what the watchdog turns into a forced exit

use std::io;

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::{Shutdown, ShutdownEvent};

/// Spawn a task forwarding SIGINT/SIGTERM to `shutdown` for the life of the process.
#[cfg(unix)]
pub fn spawn_forwarder(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = sigint.recv() => match received {
                    Some(()) => ShutdownEvent::Interrupt,
                    None => break,
                },
                received = sigterm.recv() => match received {
                    Some(()) => ShutdownEvent::Terminate,
                    None => break,
                },
            };
            tracing::info!(signal = %event, "Termination signal received");
            shutdown.notify(event);
        }
    }))
}

// Best-effort implementation for non-unix systems
#[cfg(not(unix))]
pub fn spawn_forwarder(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(signal = %ShutdownEvent::Interrupt, "Termination signal received");
            shutdown.notify(ShutdownEvent::Interrupt);
        }
    }))
}
