use uuid::Uuid;

use crate::port::model::Port;

/// Result of an allocation request. Both variants are successes.
#[derive(Clone, Debug)]
pub enum AllocationOutcome {
    /// The subscription holds this port (assigned now, or already before —
    /// the call is idempotent).
    Assigned(Port),
    /// Pool exhausted; the subscription is parked as PENDING_ALLOCATION and
    /// operators have been alerted.
    Pending,
}

impl AllocationOutcome {
    pub fn port(&self) -> Option<&Port> {
        match self {
            AllocationOutcome::Assigned(p) => Some(p),
            AllocationOutcome::Pending => None,
        }
    }
}

/// Result of one compare-and-set assignment attempt.
#[derive(Clone, Debug)]
pub enum AssignWrite {
    /// All three writes (port, subscription link, log) committed.
    Committed(Port),
    /// A concurrent allocator won the row; nothing was written. Benign —
    /// try the next candidate.
    LostRace,
}

/// What a release actually did.
#[derive(Clone, Copy, Debug)]
pub struct ReleaseReport {
    pub port_id: Uuid,
    /// Subscription whose link was cleared, when the port was assigned.
    pub cleared_subscription: Option<Uuid>,
    /// False for the no-op cases (no assignment to clear, or port disabled).
    pub changed: bool,
}
