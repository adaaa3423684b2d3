//! Error types for context capture and restoration.
//!
//! Accessor failures are kept as structured values so a single callback can
//! report every key that failed to install or restore.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for propagation operations.
#[derive(Debug, Error)]
pub enum PropagationError {
    /// Writing the captured values before a callback failed.
    ///
    /// The wrapped callback was not invoked.
    #[error("failed to install context for `{hook}`: {}", summarize(.failures))]
    Install {
        /// The listener hook being bracketed.
        hook: &'static str,
        /// Every accessor failure observed while installing and rolling back.
        failures: Vec<AccessorError>,
    },

    /// Restoring thread-local state after a callback failed.
    #[error("failed to restore context after `{hook}`: {}", summarize(.failures))]
    Restore {
        /// The listener hook being bracketed.
        hook: &'static str,
        /// Every accessor failure observed while restoring.
        failures: Vec<AccessorError>,
    },

    /// A listener factory could not produce a listener.
    #[error("Listener factory error: {0}")]
    ListenerFactory(String),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PropagationError {
    /// Returns the accessor failures carried by this error, if any.
    #[must_use]
    pub fn accessor_failures(&self) -> &[AccessorError] {
        match self {
            Self::Install { failures, .. } | Self::Restore { failures, .. } => failures,
            Self::ListenerFactory(_) | Self::Config(_) => &[],
        }
    }
}

fn summarize(failures: &[AccessorError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The accessor capability that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessorOperation {
    /// Writing a value into the slot.
    Write,
    /// Clearing the slot.
    Reset,
}

impl fmt::Display for AccessorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// Error raised by a thread-local accessor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("accessor `{key}` failed to {operation}: {message}")]
pub struct AccessorError {
    /// The accessor key.
    pub key: String,
    /// The failed operation.
    pub operation: AccessorOperation,
    /// A human-readable reason.
    pub message: String,
}

impl AccessorError {
    /// Creates a new accessor error.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        operation: AccessorOperation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            operation,
            message: message.into(),
        }
    }

    /// Creates a write failure.
    #[must_use]
    pub fn write(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(key, AccessorOperation::Write, message)
    }

    /// Creates a reset failure.
    #[must_use]
    pub fn reset(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(key, AccessorOperation::Reset, message)
    }
}
