use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::error::AllocationError;

/// Lifecycle state of a port.
///
/// Only AVAILABLE ports are candidates for allocation. RESERVED and DISABLED
/// are operator-managed parking states; ASSIGNED is entered and left solely
/// through the allocation engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PortState {
    Available,
    Reserved,
    Assigned,
    Disabled,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::Available => "AVAILABLE",
            PortState::Reserved => "RESERVED",
            PortState::Assigned => "ASSIGNED",
            PortState::Disabled => "DISABLED",
        };
        f.write_str(s)
    }
}

impl FromStr for PortState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(PortState::Available),
            "RESERVED" => Ok(PortState::Reserved),
            "ASSIGNED" => Ok(PortState::Assigned),
            "DISABLED" => Ok(PortState::Disabled),
            other => Err(format!("unknown port state: {other}")),
        }
    }
}

/// The assignment half of a port row, present iff the port is ASSIGNED.
///
/// Modeling the three columns as one optional composite makes the
/// "both-or-neither" rule on the assignment fields structural rather than a
/// convention every writer has to remember.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub assigned_at_ms: u64,
}

/// A single allocatable resource: an instance reachable at a unique url.
#[derive(Clone, Debug, Serialize)]
pub struct Port {
    pub port_id: Uuid,
    /// Unique external identifier (instance url).
    pub url: String,
    /// Operator free text.
    pub note: Option<String>,
    pub state: PortState,
    pub assignment: Option<Assignment>,
    pub created_at_ms: u64,
}

impl Port {
    /// Assembles a port, rejecting state/assignment combinations that can
    /// never occur in healthy storage. All row mapping funnels through here.
    pub fn from_parts(
        port_id: Uuid,
        url: String,
        note: Option<String>,
        state: PortState,
        assignment: Option<Assignment>,
        created_at_ms: u64,
    ) -> Result<Self, AllocationError> {
        match (state, &assignment) {
            (PortState::Assigned, None) => Err(AllocationError::Invariant(format!(
                "port {port_id} is ASSIGNED but has no assignment fields"
            ))),
            (PortState::Assigned, Some(_)) | (_, None) => Ok(Self {
                port_id,
                url,
                note,
                state,
                assignment,
                created_at_ms,
            }),
            (other, Some(_)) => Err(AllocationError::Invariant(format!(
                "port {port_id} is {other} but carries assignment fields"
            ))),
        }
    }

    pub fn is_allocatable(&self) -> bool {
        self.state == PortState::Available
    }
}

/// Operator input for creating a port.
#[derive(Clone, Debug)]
pub struct PortDescriptor {
    pub url: String,
    pub note: Option<String>,
}
