//! Error types for the resilience subsystem.

use thiserror::Error;

/// Why a single breaker attempt did not produce a value.
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    /// The breaker refused to run the operation.
    #[error("circuit breaker is open")]
    OpenCircuit,

    /// The operation ran and failed.
    #[error("{0}")]
    Operation(E),
}

impl<E> AttemptError<E> {
    /// True for the breaker's own rejection, never for an operation failure.
    pub fn is_open_circuit(&self) -> bool {
        matches!(self, AttemptError::OpenCircuit)
    }

    /// The operation failure, if this is one.
    pub fn into_operation(self) -> Option<E> {
        match self {
            AttemptError::Operation(e) => Some(e),
            AttemptError::OpenCircuit => None,
        }
    }
}

/// Result cache errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A result is already stored under this id.
    #[error("a result is already cached for id {0:?}")]
    DuplicateKey(String),
}
