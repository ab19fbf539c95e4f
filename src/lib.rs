//! Graceful shutdown orchestration for processes running several HTTP listeners.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::AppConfig;
pub use http::RejectingRouter;
pub use lifecycle::{App, AppOptions, CallbackContext, Phase, Shutdown, ShutdownReport};
pub use net::Listener;
