//! Request gate that turns a listener away from new work during shutdown.
//!
//! # Responsibilities
//! - Hold the listener's routing table
//! - Answer every request with `503 Service Unavailable` once rejecting
//! - Delegate untouched to the routing table before that
//!
//! # Design Decisions
//! - The flag is an `AtomicBool` written once by the orchestrator and read by
//!   every request task; no lock on the request path
//! - A request that read the flag just before the flip is still dispatched;
//!   that window is accepted
//! - The gate wraps the whole router (routes and fallback), so a rejected
//!   request never reaches a handler

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
    Router,
};

use crate::observability::metrics;

/// Status returned to requests arriving after rejection is armed.
pub const REJECTION_STATUS: StatusCode = StatusCode::SERVICE_UNAVAILABLE;

/// Body returned to requests arriving after rejection is armed.
pub const REJECTION_BODY: &str = "service is shutting down";

/// Shared reject flag. Transitions false → true exactly once.
#[derive(Debug, Clone)]
struct RejectFlag {
    listener: Arc<str>,
    reject: Arc<AtomicBool>,
}

impl RejectFlag {
    fn is_set(&self) -> bool {
        self.reject.load(Ordering::Acquire)
    }
}

/// A routing table decorated with a shutdown reject toggle.
#[derive(Debug, Clone)]
pub struct RejectingRouter {
    routes: Router,
    flag: RejectFlag,
}

impl RejectingRouter {
    /// Create an empty router owned by the named listener.
    pub fn new(listener: &str) -> Self {
        Self {
            routes: Router::new(),
            flag: RejectFlag {
                listener: Arc::from(listener),
                reject: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Attach a handler to `path`.
    pub fn route(mut self, path: &str, handler: MethodRouter) -> Self {
        self.routes = self.routes.route(path, handler);
        self
    }

    /// Merge a prebuilt routing table into this one.
    pub fn merge(mut self, routes: Router) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    /// Apply a middleware layer to the routes attached so far.
    pub fn map_routes(mut self, f: impl FnOnce(Router) -> Router) -> Self {
        self.routes = f(self.routes);
        self
    }

    /// Start answering every request with [`REJECTION_STATUS`]. Idempotent.
    pub fn reject(&self) {
        if !self.flag.reject.swap(true, Ordering::AcqRel) {
            tracing::info!(listener = %self.flag.listener, "Rejecting new requests");
        }
    }

    pub fn is_rejecting(&self) -> bool {
        self.flag.is_set()
    }

    /// Build the service that is actually served: the routes behind the gate.
    pub fn service(&self) -> Router {
        self.routes.clone().layer(middleware::from_fn_with_state(
            self.flag.clone(),
            reject_when_shutting_down,
        ))
    }
}

async fn reject_when_shutting_down(
    State(flag): State<RejectFlag>,
    request: Request,
    next: Next,
) -> Response {
    if flag.is_set() {
        tracing::debug!(
            listener = %flag.listener,
            method = %request.method(),
            path = %request.uri().path(),
            "Request rejected during shutdown"
        );
        metrics::record_rejected_request(&flag.listener);
        return rejection_response();
    }
    next.run(request).await
}

fn rejection_response() -> Response {
    (REJECTION_STATUS, REJECTION_BODY).into_response()
}
