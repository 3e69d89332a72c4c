use std::collections::HashMap;

use uuid::Uuid;

use super::model::{AllocationAction, AllocationLogEntry};

/// Assignment a port ends up with after replaying the log:
/// `None` = known but unassigned, `Some((subscription, customer))` = assigned.
pub type ReplayedAssignment = Option<(Uuid, Uuid)>;

/// Folds an ordered log into the per-port assignment state it implies.
///
/// Because every port state change writes exactly one entry in the same
/// transaction, replaying the log in order must land on the live table
/// state; drift between the two means a writer bypassed the engine.
pub fn reconstruct(entries: &[AllocationLogEntry]) -> HashMap<Uuid, ReplayedAssignment> {
    let mut state: HashMap<Uuid, ReplayedAssignment> = HashMap::new();

    for e in entries {
        match e.action {
            AllocationAction::Create | AllocationAction::Release => {
                state.insert(e.port_id, None);
            }
            AllocationAction::Assign | AllocationAction::Reassign => {
                let pair = match (e.subscription_id, e.customer_id) {
                    (Some(s), Some(c)) => Some((s, c)),
                    _ => None,
                };
                state.insert(e.port_id, pair);
            }
        }
    }

    state
}
