//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (app.rs):
//!     Spawn every listener → wait for the first termination event
//!
//! Shutdown (app.rs):
//!     Reject → Drain → Stop listeners → Callbacks → Release → Terminated
//!
//! Events (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT or Shutdown::trigger → shutdown bus
//!
//! Watchdog (watchdog.rs):
//!     second event or deadline → forced exit (status 1)
//! ```
//!
//! # Design Decisions
//! - Phases are strictly ordered; fan-out within a phase, barrier between phases
//! - Every per-unit failure is logged and counted, never retried
//! - The watchdog is the only global abort

pub mod app;
pub mod callbacks;
pub mod shutdown;
pub mod signals;
pub mod watchdog;

pub use app::{App, AppError, AppOptions, Phase, ReleaseHook, ShutdownReport};
pub use callbacks::{CallbackContext, CallbackOutcome, CallbackRegistry, CallbackSummary, ShutdownCallback};
pub use shutdown::{Shutdown, ShutdownEvent};
pub use watchdog::{ForcedExit, ProcessExit, Terminator, Watchdog, FORCED_EXIT_CODE};
