//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, per-connection HTTP serving)
//!     → connection.rs (connection id, live-connection accounting)
//!     → Hand off to the listener's rejecting router
//!
//! Listener States:
//!     Idle → Starting → Serving → Draining → Stopped
//! ```
//!
//! # Design Decisions
//! - Each listener owns its accept loop; listeners never share sockets
//! - Stop closes the socket first, then drains, then force-closes
//! - A listener failure is reported, never retried

pub mod connection;
pub mod listener;

pub use listener::{Listener, ListenerError, ListenerState};
