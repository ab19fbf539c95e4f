//! HTTP request handling subsystem.
//!
//! # Data Flow
//! ```text
//! Connection (net::listener)
//!     → reject.rs (503 once the listener is shutting down)
//!     → listener routes (handlers attached before start)
//!     → Send to client
//! ```

pub mod reject;

pub use reject::{RejectingRouter, REJECTION_BODY, REJECTION_STATUS};
