//! Best-effort shutdown callbacks.
//!
//! # Responsibilities
//! - Keep the ordered set of named cleanup callbacks
//! - Invoke every callback concurrently, each with its own fresh deadline
//! - Wait for all invocations, but never past an invocation's deadline
//!
//! # Design Decisions
//! - A callback receives a [`CallbackContext`] whose expiry fires exactly at
//!   its deadline; reacting to it is the callback's business
//! - An invocation still running at its deadline is abandoned, not aborted
//! - Failures and panics are logged and counted, never propagated

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;

/// Deadline-bound execution context handed to a callback.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    name: Arc<str>,
    deadline: Instant,
    token: CancellationToken,
}

impl CallbackContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the context expires.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the deadline passes or the invocation is over.
    pub async fn expired(&self) {
        self.token.cancelled().await
    }

    /// Token for child tasks that should observe the same expiry.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// A cleanup function run once during shutdown.
///
/// Implemented for any `Fn(CallbackContext) -> impl Future<Output = ()>`.
pub trait ShutdownCallback: Send + Sync + 'static {
    fn call(&self, ctx: CallbackContext) -> BoxFuture<'static, ()>;
}

impl<F, Fut> ShutdownCallback for F
where
    F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, ctx: CallbackContext) -> BoxFuture<'static, ()> {
        Box::pin(self(ctx))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Returned before its deadline.
    Completed,
    /// Still running at its deadline; abandoned.
    Expired,
    Panicked,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Completed => "completed",
            CallbackOutcome::Expired => "expired",
            CallbackOutcome::Panicked => "panicked",
        }
    }
}

/// Per-outcome counts of one callback phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackSummary {
    pub completed: usize,
    pub expired: usize,
    pub panicked: usize,
}

impl CallbackSummary {
    fn record(&mut self, outcome: CallbackOutcome) {
        match outcome {
            CallbackOutcome::Completed => self.completed += 1,
            CallbackOutcome::Expired => self.expired += 1,
            CallbackOutcome::Panicked => self.panicked += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.expired + self.panicked
    }
}

/// Ordered collection of named shutdown callbacks.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: Vec<(Arc<str>, Arc<dyn ShutdownCallback>)>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, callback: impl ShutdownCallback) -> &mut Self {
        self.callbacks.push((Arc::from(name), Arc::new(callback)));
        self
    }

    pub fn with(mut self, name: &str, callback: impl ShutdownCallback) -> Self {
        self.register(name, callback);
        self
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.callbacks.iter().map(|(name, _)| name.as_ref())
    }

    /// Run every callback concurrently with `timeout` each and wait for all of them.
    pub async fn run_all(&self, timeout: Duration) -> CallbackSummary {
        let mut invocations = JoinSet::new();
        for (name, callback) in &self.callbacks {
            let name = Arc::clone(name);
            let callback = Arc::clone(callback);
            invocations.spawn(async move {
                let outcome = invoke(&name, callback, timeout).await;
                (name, outcome)
            });
        }

        let mut summary = CallbackSummary::default();
        while let Some(joined) = invocations.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    metrics::record_callback(&name, outcome.as_str());
                    summary.record(outcome);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Callback supervisor failed");
                    summary.record(CallbackOutcome::Panicked);
                }
            }
        }
        summary
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

async fn invoke(
    name: &Arc<str>,
    callback: Arc<dyn ShutdownCallback>,
    timeout: Duration,
) -> CallbackOutcome {
    let deadline = Instant::now() + timeout;
    let token = CancellationToken::new();
    let ctx = CallbackContext {
        name: Arc::clone(name),
        deadline,
        token: token.clone(),
    };

    tracing::debug!(callback = %name, timeout = ?timeout, "Running shutdown callback");
    // `call` runs inside the task too, so a panic while building the future
    // is attributed to this callback.
    let mut invocation = tokio::spawn(async move { callback.call(ctx).await });

    let outcome = tokio::select! {
        joined = &mut invocation => match joined {
            Ok(()) => CallbackOutcome::Completed,
            Err(e) => {
                tracing::error!(callback = %name, error = %e, "Shutdown callback panicked");
                CallbackOutcome::Panicked
            }
        },
        _ = tokio::time::sleep_until(deadline) => {
            tracing::warn!(
                callback = %name,
                timeout = ?timeout,
                "Shutdown callback exceeded its deadline, abandoning it"
            );
            CallbackOutcome::Expired
        }
    };

    token.cancel();
    outcome
}
