//! Reload notifications

use std::sync::Arc;

use thiserror::Error;

use crate::vm::object::Class;

/// Failure reported by an observer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl ObserverError {
    /// Create an observer failure with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What is being reloaded
#[derive(Debug, Clone, Copy)]
pub struct ReloadEvent<'a> {
    /// Managed type name
    pub type_name: &'a str,
    /// Host class the type was originally defined as
    pub native: &'a Arc<Class>,
    /// Caller-supplied version stamp
    pub stamp: &'a str,
    /// Version number the reload produces
    pub version: u32,
}

/// Callbacks run synchronously on the reloading thread
///
/// `before_reload` runs after the new bytes are accepted and before anything
/// is published; an error aborts the reload with no state change.
/// `after_reload` runs once the new version is live; an error is reported to
/// the caller but the version stays published.
/// `should_rerun_static_initializer` is consulted on every reload.
pub trait ReloadObserver: Send + Sync {
    /// Called before the new version is published
    fn before_reload(&self, _event: &ReloadEvent<'_>) -> Result<(), ObserverError> {
        Ok(())
    }

    /// Called after the new version is published
    fn after_reload(&self, _event: &ReloadEvent<'_>) -> Result<(), ObserverError> {
        Ok(())
    }

    /// Whether the static initializer must rerun even though it did not change
    fn should_rerun_static_initializer(&self, _event: &ReloadEvent<'_>) -> bool {
        false
    }
}
