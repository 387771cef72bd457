//! Error taxonomy shared across the system

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SmError>;

/// Base error type for the service manager domain
#[derive(Error, Debug)]
pub enum SmError {
    /// Upstream OSB broker failure surfaced to the caller.
    #[error("BrokerError: {description}")]
    Broker { description: String },

    #[error("resource not found: {0}")]
    NotFound(String),

    /// Invariant violation such as a concurrent non-terminal operation
    /// or a catalog reusing the reserved reference plan name.
    #[error("{kind}: {description}")]
    Conflict {
        kind: ConflictKind,
        description: String,
    },

    #[error("BadRequest: {0}")]
    BadRequest(String),

    /// Retriable optimistic-concurrency clash on an update.
    #[error("concurrent modification detected: {0}")]
    Concurrency(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Programmer errors; never retried.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    AsyncOperationInProgress,
    CatalogUsesReservedPlanName,
    PlanMustBeBindable,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConflictKind::AsyncOperationInProgress => "AsyncOperationInProgress",
            ConflictKind::CatalogUsesReservedPlanName => "CatalogUsesReservedPlanName",
            ConflictKind::PlanMustBeBindable => "PlanMustBeBindable",
        };
        f.write_str(name)
    }
}

impl SmError {
    pub fn broker(description: impl Into<String>) -> Self {
        Self::Broker {
            description: description.into(),
        }
    }

    pub fn conflict(kind: ConflictKind, description: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            description: description.into(),
        }
    }

    pub fn async_operation_in_progress(resource_id: &str) -> Self {
        Self::conflict(
            ConflictKind::AsyncOperationInProgress,
            format!("another operation is already in progress for resource {resource_id}"),
        )
    }
}
