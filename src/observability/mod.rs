//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, histograms via `metrics`)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape on the admin listener)
//! ```
//!
//! # Design Decisions
//! - Listener name and shutdown phase flow through every event as fields
//! - Metrics are cheap and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
