use thiserror::Error;

use crate::domain::ticket::TicketStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid ticket status transition from {from:?} to {to:?}")]
    InvalidStatusTransition { from: TicketStatus, to: TicketStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Application-layer error surface. Semantic classifier failures never appear
/// here from ingestion (the use case degrades to the keyword result instead);
/// the `Classifier` variant exists for the direct-analysis boundary only.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("ticket not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("persistence conflict: {0}")]
    Conflict(String),
    #[error("semantic classifier unavailable: {0}")]
    Classifier(String),
}
