use async_trait::async_trait;
use uuid::Uuid;

use crate::allocation::types::{AssignWrite, ReleaseReport};
use crate::error::AllocationError;
use crate::port::model::Port;

/// The only writer allowed to touch a port's assignment fields and a
/// subscription's port link together. Every method is one database
/// transaction: all constituent writes commit atomically or none do, and
/// conditional updates are judged by affected-row counts, never by
/// read-then-write.
#[async_trait]
pub trait AllocationRepository: Send + Sync {
    /// Compare-and-set assignment of an AVAILABLE port to a subscription
    /// with no port. Losing the row race is reported as `LostRace`, not an
    /// error.
    async fn assign(
        &self,
        port_id: &Uuid,
        subscription_id: &Uuid,
        customer_id: &Uuid,
        now_ms: u64,
    ) -> Result<AssignWrite, AllocationError>;

    /// Operator-driven move of a port onto a different subscription.
    /// Aborts before any visible mutation if the target already holds a
    /// port; the old holder's link is cleared in the same transaction.
    async fn reassign(
        &self,
        port_id: &Uuid,
        new_subscription_id: &Uuid,
        operator_id: &Uuid,
        now_ms: u64,
    ) -> Result<Port, AllocationError>;

    /// Returns the port to the pool and clears the holder's link.
    /// No-op success when there is nothing to release; DISABLED ports stay
    /// disabled until an operator reverses that explicitly.
    async fn release(
        &self,
        port_id: &Uuid,
        operator_id: Option<&Uuid>,
        now_ms: u64,
    ) -> Result<ReleaseReport, AllocationError>;
}
