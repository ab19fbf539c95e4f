//! Named HTTP listener with cooperative shutdown.
//!
//! # Responsibilities
//! - Bind to the configured address and run the accept loop
//! - Serve HTTP/1.1 and HTTP/2 through the listener's rejecting router
//! - On stop: close the socket, drain open connections up to a deadline,
//!   then force-close whatever is left
//!
//! # Lifecycle
//! ```text
//! Idle → Starting → Serving → Draining → Stopped
//!   │        └──────────────────────────→ Failed
//!   └→ Closed (stopped before it was ever started)
//! ```

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{routing::MethodRouter, Router};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto::Builder, graceful::GracefulShutdown},
    service::TowerToHyperService,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ListenerConfig;
use crate::http::RejectingRouter;
use crate::net::connection::ConnectionTracker;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("listener `{name}` failed to bind {address}: {source}")]
    Bind {
        name: String,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("listener `{name}` failed to accept: {source}")]
    Accept {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("listener `{0}` was already started")]
    AlreadyStarted(String),

    #[error("listener `{0}` is not running")]
    NotRunning(String),

    #[error("listener `{name}` force-closed {connections} connection(s) after the stop deadline")]
    ForcedClose { name: String, connections: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Starting,
    Serving(SocketAddr),
    Draining,
    Stopped { forced: u64 },
    Closed,
    Failed,
}

impl ListenerState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            ListenerState::Stopped { .. } | ListenerState::Closed | ListenerState::Failed
        )
    }
}

/// One network server: name, bind address and a rejecting router.
pub struct Listener {
    name: String,
    address: String,
    router: RejectingRouter,
    request_timeout: Duration,
    connections: ConnectionTracker,
    /// Absolute drain deadline, set once by `stop`.
    stop_tx: watch::Sender<Option<Instant>>,
    state_tx: watch::Sender<ListenerState>,
}

impl Listener {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            router: RejectingRouter::new(&name),
            name,
            address: address.into(),
            request_timeout: Duration::from_secs(30),
            connections: ConnectionTracker::new(),
            stop_tx: watch::channel(None).0,
            state_tx: watch::channel(ListenerState::Idle).0,
        }
    }

    pub fn from_config(config: &ListenerConfig) -> Self {
        Self::new(&config.name, &config.bind_address)
            .with_request_timeout(Duration::from_secs(config.request_timeout_secs))
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Attach a handler to `path`. Must happen before the listener starts.
    pub fn route(mut self, path: &str, handler: MethodRouter) -> Self {
        self.router = self.router.route(path, handler);
        self
    }

    /// Merge a prebuilt routing table. Must happen before the listener starts.
    pub fn merge(mut self, routes: Router) -> Self {
        self.router = self.router.merge(routes);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ListenerState {
        *self.state_tx.borrow()
    }

    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }

    /// Answer all further requests with 503. Idempotent, safe while serving.
    pub fn reject_requests(&self) {
        self.router.reject();
    }

    pub fn is_rejecting(&self) -> bool {
        self.router.is_rejecting()
    }

    /// Wait until the listener is bound and return its local address.
    pub async fn wait_serving(&self) -> Result<SocketAddr, ListenerError> {
        let mut state_rx = self.state_tx.subscribe();
        let state = state_rx
            .wait_for(|s| !matches!(s, ListenerState::Idle | ListenerState::Starting))
            .await
            .map(|s| *s)
            .map_err(|_| self.not_running())?;

        match state {
            ListenerState::Serving(addr) => Ok(addr),
            _ => Err(self.not_running()),
        }
    }

    /// Bind and serve until stopped.
    ///
    /// Returns `Ok(())` once an intentional stop has completed and `Err` if the
    /// listener failed on its own. Running out of descriptors or buffers is
    /// not a failure: accepting pauses with a backoff and resumes. Other
    /// failures are not retried.
    pub async fn start(&self) -> Result<(), ListenerError> {
        let claimed = self.state_tx.send_if_modified(|state| {
            if *state == ListenerState::Idle {
                *state = ListenerState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return match self.state() {
                ListenerState::Closed => Ok(()),
                _ => Err(ListenerError::AlreadyStarted(self.name.clone())),
            };
        }

        let listener = match TcpListener::bind(&self.address).await {
            Ok(listener) => listener,
            Err(source) => {
                return Err(self.fail(ListenerError::Bind {
                    name: self.name.clone(),
                    address: self.address.clone(),
                    source,
                }))
            }
        };
        let local_addr = listener.local_addr().map_err(|source| {
            self.fail(ListenerError::Bind {
                name: self.name.clone(),
                address: self.address.clone(),
                source,
            })
        })?;

        self.state_tx.send_replace(ListenerState::Serving(local_addr));
        tracing::info!(listener = %self.name, address = %local_addr, "Listener started");

        let service = TowerToHyperService::new(self.build_service());
        let builder = Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let mut tasks = JoinSet::new();
        let mut stop_rx = self.stop_tx.subscribe();

        let mut backoff = None;
        let exit = loop {
            if let Some(deadline) = *stop_rx.borrow_and_update() {
                break LoopExit::Stopped(deadline);
            }
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => {
                            backoff = None;
                            conn
                        }
                        Err(e) => match classify_accept_error(&e) {
                            AcceptFailure::Connection => {
                                tracing::debug!(listener = %self.name, error = %e, "Accept error");
                                continue;
                            }
                            AcceptFailure::Exhausted => {
                                let delay = next_backoff(backoff);
                                backoff = Some(delay);
                                tracing::warn!(
                                    listener = %self.name,
                                    error = %e,
                                    retry_in = ?delay,
                                    "Accept failed, backing off"
                                );
                                tokio::select! {
                                    _ = tokio::time::sleep(delay) => {}
                                    _ = stop_rx.changed() => {}
                                }
                                continue;
                            }
                            AcceptFailure::Fatal => break LoopExit::Failed(e),
                        },
                    };

                    let guard = self.connections.track();
                    tracing::trace!(
                        listener = %self.name,
                        connection_id = %guard.id(),
                        peer_addr = %peer_addr,
                        "Connection accepted"
                    );

                    let conn = builder
                        .serve_connection_with_upgrades(TokioIo::new(stream), service.clone())
                        .into_owned();
                    let conn = graceful.watch(conn);
                    tasks.spawn(async move {
                        if let Err(e) = conn.await {
                            tracing::debug!(connection_id = %guard.id(), error = %e, "Connection error");
                        }
                        drop(guard);
                    });
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break LoopExit::Stopped(Instant::now());
                    }
                }
            }
        };

        drop(listener);
        self.state_tx.send_replace(ListenerState::Draining);

        // A failed socket still lets admitted connections finish; they are
        // bounded by the request timeout.
        let (deadline, failure) = match exit {
            LoopExit::Stopped(deadline) => (deadline, None),
            LoopExit::Failed(source) => {
                tracing::error!(
                    listener = %self.name,
                    error = %source,
                    "Listener socket failed, draining open connections"
                );
                (Instant::now() + self.request_timeout, Some(source))
            }
        };
        tracing::info!(
            listener = %self.name,
            open_connections = self.connections.active_count(),
            "Listener draining"
        );

        let forced = match tokio::time::timeout_at(deadline, graceful.shutdown()).await {
            Ok(()) => 0,
            Err(_) => {
                let stragglers = self.connections.active_count();
                tracing::warn!(
                    listener = %self.name,
                    connections = stragglers,
                    "Stop deadline reached, force-closing connections"
                );
                stragglers
            }
        };
        tasks.shutdown().await;

        if let Some(source) = failure {
            return Err(self.fail(ListenerError::Accept {
                name: self.name.clone(),
                source,
            }));
        }

        self.state_tx.send_replace(ListenerState::Stopped { forced });
        tracing::info!(listener = %self.name, "Listener stopped");
        Ok(())
    }

    /// Stop accepting, drain open connections until `timeout`, then force-close.
    ///
    /// Succeeds when every connection finished in time. A listener that was
    /// never started is closed so a later `start` returns immediately.
    pub async fn stop(&self, timeout: Duration) -> Result<(), ListenerError> {
        let deadline = Instant::now() + timeout;
        self.stop_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(deadline);
                true
            } else {
                false
            }
        });

        let closed_before_start = self.state_tx.send_if_modified(|state| {
            if *state == ListenerState::Idle {
                *state = ListenerState::Closed;
                true
            } else {
                false
            }
        });
        if closed_before_start {
            tracing::info!(listener = %self.name, "Listener closed before it started");
            return Ok(());
        }

        tracing::info!(listener = %self.name, timeout = ?timeout, "Stopping listener");

        let mut state_rx = self.state_tx.subscribe();
        let state = state_rx
            .wait_for(ListenerState::is_terminal)
            .await
            .map(|s| *s)
            .map_err(|_| self.not_running())?;

        match state {
            ListenerState::Stopped { forced: 0 } | ListenerState::Closed => Ok(()),
            ListenerState::Stopped { forced } => Err(ListenerError::ForcedClose {
                name: self.name.clone(),
                connections: forced,
            }),
            _ => Err(self.not_running()),
        }
    }

    /// Routes behind the reject gate, wrapped in the listener's middleware stack.
    #[allow(deprecated)]
    fn build_service(&self) -> Router {
        self.router
            .service()
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(TraceLayer::new_for_http())
    }

    fn fail(&self, err: ListenerError) -> ListenerError {
        self.state_tx.send_replace(ListenerState::Failed);
        err
    }

    fn not_running(&self) -> ListenerError {
        ListenerError::NotRunning(self.name.clone())
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

enum LoopExit {
    /// `stop` set a drain deadline.
    Stopped(Instant),
    /// The listening socket itself is broken.
    Failed(io::Error),
}

#[derive(Debug, PartialEq, Eq)]
enum AcceptFailure {
    /// The peer went away before the accept completed; retry at once.
    Connection,
    /// Out of descriptors or buffers; retry after a backoff.
    Exhausted,
    Fatal,
}

const INITIAL_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

fn classify_accept_error(e: &io::Error) -> AcceptFailure {
    match e.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => return AcceptFailure::Connection,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::OutOfMemory => {
            return AcceptFailure::Exhausted
        }
        _ => {}
    }

    if is_resource_exhaustion(e) {
        AcceptFailure::Exhausted
    } else {
        AcceptFailure::Fatal
    }
}

#[cfg(unix)]
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_e: &io::Error) -> bool {
    false
}

/// Doubles the previous delay, capped at one second.
fn next_backoff(previous: Option<Duration>) -> Duration {
    match previous {
        None => INITIAL_ACCEPT_BACKOFF,
        Some(delay) => (delay * 2).min(MAX_ACCEPT_BACKOFF),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::sync::Arc;

    fn spawn_start(listener: &Arc<Listener>) -> tokio::task::JoinHandle<Result<(), ListenerError>> {
        let listener = Arc::clone(listener);
        tokio::spawn(async move { listener.start().await })
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test]
    async fn serves_and_stops_cleanly() {
        let listener = Arc::new(
            Listener::new("business", "127.0.0.1:0").route("/", get(|| async { "hello" })),
        );
        let serve = spawn_start(&listener);
        let addr = listener.wait_serving().await.unwrap();

        let body = client()
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "hello");

        listener.stop(Duration::from_secs(1)).await.unwrap();
        assert!(serve.await.unwrap().is_ok());
        assert_eq!(listener.state(), ListenerState::Stopped { forced: 0 });
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let listener = Arc::new(Listener::new("business", "127.0.0.1:0"));
        let serve = spawn_start(&listener);
        listener.wait_serving().await.unwrap();

        let err = listener.start().await.unwrap_err();
        assert!(matches!(err, ListenerError::AlreadyStarted(_)));

        listener.stop(Duration::from_secs(1)).await.unwrap();
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_before_start_closes_listener() {
        let listener = Listener::new("admin", "127.0.0.1:0");
        listener.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Closed);

        listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Closed);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let listener = Listener::new("business", addr.to_string());
        let err = listener.start().await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
        assert_eq!(listener.state(), ListenerState::Failed);

        assert!(matches!(
            listener.wait_serving().await,
            Err(ListenerError::NotRunning(_))
        ));
        assert!(matches!(
            listener.stop(Duration::from_millis(10)).await,
            Err(ListenerError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn in_flight_request_finishes_within_deadline() {
        let listener = Arc::new(Listener::new("business", "127.0.0.1:0").route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                "done"
            }),
        ));
        let serve = spawn_start(&listener);
        let addr = listener.wait_serving().await.unwrap();

        let request = tokio::spawn(async move {
            client()
                .get(format!("http://{}/slow", addr))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        listener.stop(Duration::from_secs(2)).await.unwrap();
        assert_eq!(request.await.unwrap(), "done");
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stragglers_are_force_closed() {
        let listener = Arc::new(Listener::new("business", "127.0.0.1:0").route(
            "/hang",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "never"
            }),
        ));
        let serve = spawn_start(&listener);
        let addr = listener.wait_serving().await.unwrap();

        let request = tokio::spawn(async move {
            client().get(format!("http://{}/hang", addr)).send().await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(listener.active_connections(), 1);

        let started = std::time::Instant::now();
        let err = listener.stop(Duration::from_millis(100)).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(err, ListenerError::ForcedClose { connections: 1, .. }));
        assert_eq!(listener.active_connections(), 0);

        assert!(request.await.unwrap().is_err());
        serve.await.unwrap().unwrap();
    }

    #[test]
    fn dropped_peers_are_retried_at_once() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(classify_accept_error(&reset), AcceptFailure::Connection);
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_is_retried_after_backoff() {
        let emfile = io::Error::from_raw_os_error(libc::EMFILE);
        let enfile = io::Error::from_raw_os_error(libc::ENFILE);
        assert_eq!(classify_accept_error(&emfile), AcceptFailure::Exhausted);
        assert_eq!(classify_accept_error(&enfile), AcceptFailure::Exhausted);

        let ebadf = io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(classify_accept_error(&ebadf), AcceptFailure::Fatal);
    }

    #[test]
    fn accept_backoff_doubles_up_to_a_cap() {
        let mut delay = next_backoff(None);
        assert_eq!(delay, Duration::from_millis(5));

        delay = next_backoff(Some(delay));
        assert_eq!(delay, Duration::from_millis(10));

        for _ in 0..20 {
            delay = next_backoff(Some(delay));
        }
        assert_eq!(delay, Duration::from_secs(1));
    }
}
