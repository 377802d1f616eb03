//! Workload accounting: org/division load counters and staff availability
//! moved in lock-step with incident transitions. Every function here runs
//! inside the caller's store transaction so a failed transition rolls the
//! counters back with it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::domain::{
    AuditKind, Availability, CapacityStatus, DivisionId, IncidentId, OrganizationId, StaffId,
};
use crate::error::CoreError;
use crate::store::StoreState;

/// Load-derived status. Capacity zero means "capacity untracked": such
/// entities stay `Active` and never report `Overloaded`.
pub fn capacity_status(current_load: u32, capacity: u32) -> CapacityStatus {
    if capacity == 0 {
        CapacityStatus::Active
    } else if current_load >= capacity {
        CapacityStatus::Overloaded
    } else if current_load > 0 {
        CapacityStatus::Active
    } else {
        CapacityStatus::Available
    }
}

fn bump_organization(
    state: &mut StoreState,
    id: &OrganizationId,
    delta: i64,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    let org = state.organization_mut(id)?;
    if org.status == CapacityStatus::Inactive {
        return Err(CoreError::CapacityExceeded(format!(
            "organization {id} is inactive"
        )));
    }
    org.current_load = apply_delta(org.current_load, delta);
    org.status = capacity_status(org.current_load, org.capacity);
    org.updated_at = now;
    Ok(())
}

fn bump_division(
    state: &mut StoreState,
    id: &DivisionId,
    delta: i64,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    let division = state.division_mut(id)?;
    if division.status == CapacityStatus::Inactive {
        return Err(CoreError::CapacityExceeded(format!(
            "division {id} is inactive"
        )));
    }
    division.current_load = apply_delta(division.current_load, delta);
    division.status = capacity_status(division.current_load, division.capacity);
    division.updated_at = now;
    Ok(())
}

fn apply_delta(load: u32, delta: i64) -> u32 {
    (load as i64 + delta).max(0) as u32
}

/// Take one unit of capacity on the org (and division), and mark the staff
/// member busy when one is named. Refuses inactive targets.
pub fn acquire(
    state: &mut StoreState,
    organization_id: &OrganizationId,
    division_id: Option<&DivisionId>,
    staff_id: Option<&StaffId>,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    bump_organization(state, organization_id, 1, now)?;
    if let Some(division_id) = division_id {
        bump_division(state, division_id, 1, now)?;
    }
    if let Some(staff_id) = staff_id {
        let staff = state.staff_member_mut(staff_id)?;
        if staff.status == crate::domain::ActivityStatus::Inactive {
            return Err(CoreError::CapacityExceeded(format!(
                "staff {staff_id} is inactive"
            )));
        }
        staff.availability = Availability::Busy;
        staff.updated_at = now;
    }
    Ok(())
}

/// Release one unit of capacity. Unlike `acquire`, release never refuses:
/// an entity deactivated mid-assignment must still give its load back. The
/// staff member returns to `Available` only when the released incident was
/// their last capacity-holding assignment, verified against the incident
/// table in the same transaction.
pub fn release(
    state: &mut StoreState,
    incident_id: &IncidentId,
    organization_id: Option<&OrganizationId>,
    division_id: Option<&DivisionId>,
    staff_id: Option<&StaffId>,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    if let Some(organization_id) = organization_id {
        if let Some(org) = state.organizations.get_mut(organization_id) {
            org.current_load = apply_delta(org.current_load, -1);
            if org.status != CapacityStatus::Inactive {
                org.status = capacity_status(org.current_load, org.capacity);
            }
            org.updated_at = now;
        }
    }
    if let Some(division_id) = division_id {
        if let Some(division) = state.divisions.get_mut(division_id) {
            division.current_load = apply_delta(division.current_load, -1);
            if division.status != CapacityStatus::Inactive {
                division.status = capacity_status(division.current_load, division.capacity);
            }
            division.updated_at = now;
        }
    }
    if let Some(staff_id) = staff_id {
        if state.active_assignments_for_staff(staff_id, Some(incident_id)) == 0 {
            if let Ok(staff) = state.staff_member_mut(staff_id) {
                staff.availability = Availability::Available;
                staff.updated_at = now;
            }
        }
    }
    Ok(())
}

/// Atomic release-then-acquire used by reassignment.
#[allow(clippy::too_many_arguments)]
pub fn rebalance(
    state: &mut StoreState,
    incident_id: &IncidentId,
    old_organization: Option<&OrganizationId>,
    old_division: Option<&DivisionId>,
    old_staff: Option<&StaffId>,
    new_organization: &OrganizationId,
    new_division: Option<&DivisionId>,
    new_staff: Option<&StaffId>,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    release(state, incident_id, old_organization, old_division, old_staff, now)?;
    acquire(state, new_organization, new_division, new_staff, now)
}

/// A counter that drifted from the incident table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadDiscrepancy {
    pub entity: String,
    pub recorded: u32,
    pub actual: u32,
}

/// Recompute `current_load` from the incidents that actually hold capacity
/// and restore staff availability; corrections are audited.
pub fn reconcile(state: &mut StoreState, now: DateTime<Utc>) -> Vec<LoadDiscrepancy> {
    let mut discrepancies = Vec::new();

    let org_ids: Vec<OrganizationId> = state.organizations.keys().cloned().collect();
    for id in org_ids {
        let actual = state
            .incidents
            .values()
            .filter(|incident| incident.status.holds_capacity())
            .filter(|incident| incident.assigned_organization_id.as_ref() == Some(&id))
            .count() as u32;
        let org = state.organizations.get_mut(&id).expect("org id just listed");
        if org.current_load != actual {
            discrepancies.push(LoadDiscrepancy {
                entity: format!("organization {id}"),
                recorded: org.current_load,
                actual,
            });
            org.current_load = actual;
            if org.status != CapacityStatus::Inactive {
                org.status = capacity_status(actual, org.capacity);
            }
            org.updated_at = now;
        }
    }

    let division_ids: Vec<DivisionId> = state.divisions.keys().cloned().collect();
    for id in division_ids {
        let actual = state
            .incidents
            .values()
            .filter(|incident| incident.status.holds_capacity())
            .filter(|incident| incident.assigned_division_id.as_ref() == Some(&id))
            .count() as u32;
        let division = state.divisions.get_mut(&id).expect("division id just listed");
        if division.current_load != actual {
            discrepancies.push(LoadDiscrepancy {
                entity: format!("division {id}"),
                recorded: division.current_load,
                actual,
            });
            division.current_load = actual;
            if division.status != CapacityStatus::Inactive {
                division.status = capacity_status(actual, division.capacity);
            }
            division.updated_at = now;
        }
    }

    let staff_ids: Vec<StaffId> = state.staff.keys().cloned().collect();
    for id in staff_ids {
        let active = state.active_assignments_for_staff(&id, None);
        let staff = state.staff.get_mut(&id).expect("staff id just listed");
        let expected = if active > 0 {
            Availability::Busy
        } else if staff.availability == Availability::Busy {
            Availability::Available
        } else {
            staff.availability
        };
        if staff.availability != expected {
            discrepancies.push(LoadDiscrepancy {
                entity: format!("staff {id}"),
                recorded: (staff.availability == Availability::Busy) as u32,
                actual: (expected == Availability::Busy) as u32,
            });
            staff.availability = expected;
            staff.updated_at = now;
        }
    }

    for discrepancy in &discrepancies {
        warn!(
            entity = %discrepancy.entity,
            recorded = discrepancy.recorded,
            actual = discrepancy.actual,
            "workload counter drift corrected"
        );
        state.append_audit(
            now,
            "system",
            None,
            AuditKind::Reconcile,
            format!(
                "{}: recorded {} actual {}",
                discrepancy.entity, discrepancy.recorded, discrepancy.actual
            ),
            None,
            None,
        );
    }

    discrepancies
}
