//! Error types for recserve
//!
//! This module defines the error taxonomy shared by the cache, dataset and
//! metadata stores, the retrieval engine and the snapshot coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Common result type for recserve operations
pub type Result<T> = std::result::Result<T, Error>;

/// One failed target of a multi-target administrative operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFailure {
    /// Name of the target (e.g. `delete_users`, `values`)
    pub target: String,
    /// Rendered cause
    pub reason: String,
}

impl TargetFailure {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.reason)
    }
}

/// Common error type for recserve
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("partial failure: {}", render_failures(.failures))]
    PartialFailure { failures: Vec<TargetFailure> },

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

fn render_failures(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a backend unavailable error
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Collapse per-target failures into a result.
    ///
    /// An empty list is success; anything else is a `PartialFailure`.
    pub fn from_failures(failures: Vec<TargetFailure>) -> Result<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self::PartialFailure { failures })
        }
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Io(_))
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Failed targets carried by a `PartialFailure`, empty otherwise
    #[must_use]
    pub fn failures(&self) -> &[TargetFailure] {
        match self {
            Self::PartialFailure { failures } => failures,
            _ => &[],
        }
    }
}
