//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check listener identities are usable and unique
//! - Measure how far the shutdown phases can run past the forced-exit deadline
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::time::Duration;

use crate::config::schema::{AppConfig, ShutdownConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("at least one listener must be configured")]
    NoListeners,

    #[error("listener #{index} has an empty name")]
    EmptyListenerName { index: usize },

    #[error("listener `{name}` is configured more than once")]
    DuplicateListener { name: String },

    #[error("listener `{name}` has an empty bind address")]
    EmptyBindAddress { name: String },

    #[error("shutdown_timeout_ms must be greater than zero")]
    ZeroShutdownTimeout,
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listeners.is_empty() {
        errors.push(ValidationError::NoListeners);
    }

    let mut seen = HashSet::new();
    for (index, listener) in config.listeners.iter().enumerate() {
        if listener.name.trim().is_empty() {
            errors.push(ValidationError::EmptyListenerName { index });
            continue;
        }
        if !seen.insert(listener.name.as_str()) {
            errors.push(ValidationError::DuplicateListener {
                name: listener.name.clone(),
            });
        }
        if listener.bind_address.trim().is_empty() {
            errors.push(ValidationError::EmptyBindAddress {
                name: listener.name.clone(),
            });
        }
    }

    validate_shutdown(&config.shutdown, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_shutdown(shutdown: &ShutdownConfig, errors: &mut Vec<ValidationError>) {
    if shutdown.shutdown_timeout_ms == 0 {
        errors.push(ValidationError::ZeroShutdownTimeout);
        return;
    }
}

/// How far drain, listener stop and callback budgets together reach past the
/// forced-exit deadline, if at all.
///
/// Not a validation error: the watchdog ends a shutdown that runs into the
/// deadline, and tuning for that is legitimate.
pub fn budget_overrun(shutdown: &ShutdownConfig) -> Option<Duration> {
    let budget_ms = shutdown
        .drain_wait_ms
        .saturating_add(shutdown.listener_stop_timeout_ms)
        .saturating_add(shutdown.callback_timeout_ms);
    budget_ms
        .checked_sub(shutdown.shutdown_timeout_ms)
        .map(Duration::from_millis)
}
