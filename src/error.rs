use thiserror::Error;
use uuid::Uuid;

/// Failure taxonomy for the allocation subsystem.
///
/// "No port available" is deliberately absent: an exhausted pool is a normal
/// outcome (`AllocationOutcome::Pending`), not a failure.
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("port not found: {0}")]
    PortNotFound(Uuid),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    /// The target subscription already holds a port.
    #[error("subscription {0} already has a port assigned")]
    AlreadyAssigned(Uuid),

    /// Operator mutation rejected while the port is assigned.
    #[error("port {0} is assigned; release or reassign it first")]
    PortAssigned(Uuid),

    #[error("port {0} is disabled")]
    PortDisabled(Uuid),

    #[error("port url already in use: {0}")]
    DuplicateUrl(String),

    /// Lost a compare-and-set race against a concurrent writer.
    /// The caller may retry; nothing was persisted.
    #[error("concurrent update on port {0}; retry")]
    ConflictRetryable(Uuid),

    /// Stored data or a requested transition violates a structural invariant.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Storage failure. The enclosing transaction was rolled back; no
    /// partial state survives.
    #[error("storage failure: {0}")]
    Persistence(#[from] sqlx::Error),
}
