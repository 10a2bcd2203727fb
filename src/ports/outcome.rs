//! Results of mutating port operations
//!
//! Provisioning and cleanup are best-effort at their edges: a failed
//! compensating delete or a failed sweep deletion does not change whether
//! the operation succeeded. Those are reported as warnings next to the
//! value or the primary error.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::error::{PortManagerError, ProviderError};
use crate::provider::ResourceKind;

/// A non-fatal problem encountered while performing an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A compensating delete failed; the resource is leaked
    ResourceLeak {
        kind: ResourceKind,
        id: String,
        error: ProviderError,
    },
    /// A best-effort delete failed; it will be retried on the next cleanup
    DeleteFailed {
        kind: ResourceKind,
        id: String,
        error: ProviderError,
    },
}

impl Warning {
    pub fn resource_leak(kind: ResourceKind, id: &str, error: ProviderError) -> Self {
        let warning = Warning::ResourceLeak {
            kind,
            id: id.to_string(),
            error,
        };
        warn!("{}", warning);
        warning
    }

    pub fn delete_failed(kind: ResourceKind, id: &str, error: ProviderError) -> Self {
        let warning = Warning::DeleteFailed {
            kind,
            id: id.to_string(),
            error,
        };
        warn!("{}", warning);
        warning
    }

    pub fn id(&self) -> &str {
        match self {
            Warning::ResourceLeak { id, .. } | Warning::DeleteFailed { id, .. } => id,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ResourceLeak { kind, id, error } => write!(
                f,
                "resource leak: could not delete dysfunctional {} {}: {}",
                kind, id, error
            ),
            Warning::DeleteFailed { kind, id, error } => write!(
                f,
                "failed to delete unused {} {}: {}; the operation will be retried later",
                kind, id, error
            ),
        }
    }
}

/// Successful result with the warnings collected on the way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Report<T> {
    pub fn new(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Failed result; `warnings` never replace `error`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct Failure {
    #[source]
    pub error: PortManagerError,
    pub warnings: Vec<Warning>,
}

impl Failure {
    pub fn new(error: impl Into<PortManagerError>, warnings: Vec<Warning>) -> Self {
        Self {
            error: error.into(),
            warnings,
        }
    }
}

impl From<PortManagerError> for Failure {
    fn from(error: PortManagerError) -> Self {
        Self::new(error, Vec::new())
    }
}

impl From<ProviderError> for Failure {
    fn from(error: ProviderError) -> Self {
        Self::new(error, Vec::new())
    }
}

impl From<Failure> for PortManagerError {
    fn from(failure: Failure) -> Self {
        failure.error
    }
}

/// Result type of the mutating port operations
pub type Outcome<T> = Result<Report<T>, Failure>;
