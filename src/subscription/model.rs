use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SubscriptionStatus {
    Active,
    /// Payment succeeded but no port was free; the subscription is parked
    /// until capacity returns. A valid resting state, not a failure.
    PendingAllocation,
    Expired,
    Cancelled,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::PendingAllocation => "PENDING_ALLOCATION",
            SubscriptionStatus::Expired => "EXPIRED",
            SubscriptionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "PENDING_ALLOCATION" => Ok(SubscriptionStatus::PendingAllocation),
            "EXPIRED" => Ok(SubscriptionStatus::Expired),
            "CANCELLED" => Ok(SubscriptionStatus::Cancelled),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// A customer's plan subscription. Carries at most one assigned port.
#[derive(Clone, Debug, Serialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    /// Order that created this subscription, when the billing flow recorded one.
    pub order_id: Option<Uuid>,
    pub status: SubscriptionStatus,
    pub port_id: Option<Uuid>,
    pub created_at_ms: u64,
}

impl Subscription {
    pub fn has_port(&self) -> bool {
        self.port_id.is_some()
    }

    /// Terminated subscriptions must not keep holding a port; the sweeper
    /// reclaims theirs.
    pub fn is_terminated(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Expired | SubscriptionStatus::Cancelled
        )
    }
}

/// Input from the billing flow when a paid order materializes.
#[derive(Clone, Debug)]
pub struct NewSubscription {
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub order_id: Option<Uuid>,
}
