use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AllocationError;
use crate::subscription::model::{NewSubscription, Subscription, SubscriptionStatus};

/// Subscription-side surface of the allocation subsystem.
///
/// Deliberately narrow: `port_id` has no setter here. The link column is
/// written only inside the allocation composites, together with the matching
/// port-state change and log entry.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Billing-flow entry point: records a subscription as ACTIVE.
    async fn create(
        &self,
        new: &NewSubscription,
        now_ms: u64,
    ) -> Result<Subscription, AllocationError>;

    async fn fetch_by_id(
        &self,
        subscription_id: &Uuid,
    ) -> Result<Option<Subscription>, AllocationError>;

    async fn set_status(
        &self,
        subscription_id: &Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), AllocationError>;

    /// Expired/cancelled subscriptions still holding a port, oldest first.
    /// Feed for the release sweeper.
    async fn fetch_release_candidates(
        &self,
        limit: usize,
    ) -> Result<Vec<Subscription>, AllocationError>;
}
