use chrono::{DateTime, Utc};

use crate::domain::{Division, Organization, Staff};
use crate::store::StoreState;

/// Consistent read of the fleet used by one ranking call. Immutable for the
/// duration of a decision; the assignment transaction re-validates the chosen
/// rows afterwards.
#[derive(Debug, Clone)]
pub struct FleetSnapshot {
    pub organizations: Vec<Organization>,
    pub divisions: Vec<Division>,
    pub staff: Vec<Staff>,
    pub taken_at: DateTime<Utc>,
}

impl FleetSnapshot {
    pub fn capture(state: &StoreState, now: DateTime<Utc>) -> Self {
        Self {
            organizations: state.organizations.values().cloned().collect(),
            divisions: state.divisions.values().cloned().collect(),
            staff: state.staff.values().cloned().collect(),
            taken_at: now,
        }
    }
}
