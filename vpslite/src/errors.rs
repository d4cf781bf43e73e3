//! Error taxonomy for the vpslite runtime.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type VpsliteResult<T> = Result<T, VpsliteError>;

/// All errors surfaced by the runtime and its components.
///
/// Variants map onto distinct caller-visible failure classes:
/// bad input (`InvalidArgument`), resource exhaustion (`PoolExhausted`),
/// concurrent-operation races (`Conflict`), backend failures
/// (`Provision`/`Deprovision`), and lookups (`NotFound`). `DuplicateId`
/// and `Internal` indicate invariant violations and should never reach
/// callers during normal operation.
#[derive(Debug, Error)]
pub enum VpsliteError {
    /// Caller-supplied input was rejected before any side effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No free identifier or port remained after bounded retries.
    #[error("{0} pool exhausted")]
    PoolExhausted(&'static str),

    /// An instance id was allocated twice. Registry/allocator bug.
    #[error("duplicate instance id {0}")]
    DuplicateId(String),

    /// A concurrent operation on the same instance (or port) won the race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend creation failed. Transient failures are retried with
    /// backoff before escalating; permanent ones escalate immediately.
    #[error("provisioning failed ({}): {message}", if *.transient { "transient" } else { "permanent" })]
    Provision { message: String, transient: bool },

    /// Backend teardown failed. Always safe to retry.
    #[error("deprovisioning failed: {0}")]
    Deprovision(String),

    /// No instance with the given id, live or tombstoned.
    #[error("instance {0} not found")]
    NotFound(String),

    /// `BACKEND` named a provisioner variant this build does not know.
    #[error("unknown backend '{0}' (expected 'mock' or 'container')")]
    UnknownBackend(String),

    /// Invariant violation: lock poisoning, invalid state transition,
    /// persistence failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VpsliteError {
    /// Build a transient provisioning error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Provision {
            message: message.into(),
            transient: true,
        }
    }

    /// Build a permanent provisioning error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Provision {
            message: message.into(),
            transient: false,
        }
    }

    /// Whether a retry may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provision { transient: true, .. })
    }
}
