use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AllocationAction {
    Create,
    Assign,
    Reassign,
    Release,
}

impl fmt::Display for AllocationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllocationAction::Create => "CREATE",
            AllocationAction::Assign => "ASSIGN",
            AllocationAction::Reassign => "REASSIGN",
            AllocationAction::Release => "RELEASE",
        };
        f.write_str(s)
    }
}

impl FromStr for AllocationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(AllocationAction::Create),
            "ASSIGN" => Ok(AllocationAction::Assign),
            "REASSIGN" => Ok(AllocationAction::Reassign),
            "RELEASE" => Ok(AllocationAction::Release),
            other => Err(format!("unknown allocation action: {other}")),
        }
    }
}

/// One immutable audit row. Written in the same transaction as the port
/// state change it records; never updated or deleted.
#[derive(Clone, Debug, Serialize)]
pub struct AllocationLogEntry {
    pub entry_id: Uuid,
    pub port_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub action: AllocationAction,
    /// None = automatic system action; Some = the operator who did it.
    pub performed_by: Option<Uuid>,
    pub at_ms: u64,
}

/// Entry under construction, one constructor per action kind.
#[derive(Clone, Debug)]
pub struct NewLogEntry {
    pub entry_id: Uuid,
    pub port_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub action: AllocationAction,
    pub performed_by: Option<Uuid>,
    pub at_ms: u64,
}

impl NewLogEntry {
    pub fn create(port_id: Uuid, operator_id: Uuid, at_ms: u64) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            port_id,
            subscription_id: None,
            customer_id: None,
            action: AllocationAction::Create,
            performed_by: Some(operator_id),
            at_ms,
        }
    }

    /// Automatic assignment driven by the billing flow; never operator-attributed.
    pub fn assign(port_id: Uuid, subscription_id: Uuid, customer_id: Uuid, at_ms: u64) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            port_id,
            subscription_id: Some(subscription_id),
            customer_id: Some(customer_id),
            action: AllocationAction::Assign,
            performed_by: None,
            at_ms,
        }
    }

    /// Always a manual action; `operator_id` is mandatory.
    pub fn reassign(
        port_id: Uuid,
        subscription_id: Uuid,
        customer_id: Uuid,
        operator_id: Uuid,
        at_ms: u64,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            port_id,
            subscription_id: Some(subscription_id),
            customer_id: Some(customer_id),
            action: AllocationAction::Reassign,
            performed_by: Some(operator_id),
            at_ms,
        }
    }

    /// Subscription/customer are those the port was released from, when it
    /// had an assignment at all.
    pub fn release(
        port_id: Uuid,
        subscription_id: Option<Uuid>,
        customer_id: Option<Uuid>,
        performed_by: Option<Uuid>,
        at_ms: u64,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            port_id,
            subscription_id,
            customer_id,
            action: AllocationAction::Release,
            performed_by,
            at_ms,
        }
    }
}
