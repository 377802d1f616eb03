//! Lifecycle coordinator: the per-incident state machine.
//!
//! `Pending → PendingAssignment → InProgress → Done | Cancelled`, with
//! role-gated transitions, acceptance deadlines, and auditable reassignment.
//! Every transition validates its predecessor, applies the workload delta,
//! and appends its audit event inside a single store transaction.

pub mod policy;
pub mod router;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AssignmentConfig;
use crate::domain::{
    AuditKind, Availability, CapacityStatus, DivisionId, FacilityKind, Incident, IncidentId,
    IncidentStatus, OrganizationId, StaffId,
};
use crate::error::CoreError;
use crate::geo::valid_coordinates;
use crate::identity::Principal;
use crate::store::{MemoryStore, StoreState};
use crate::workflows::assignment::{AssignmentEngine, Candidate, FleetSnapshot};
use crate::workflows::triage::{TriageInput, TriageService};
use crate::workflows::workload;

pub use policy::{authorize, Action};

/// Timing knobs for the assignment window and reject cooldown.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleSettings {
    pub window_seconds: i64,
    pub reject_cooldown_seconds: i64,
}

impl LifecycleSettings {
    pub fn new(window: Duration, reject_cooldown: Duration) -> Self {
        Self {
            window_seconds: window.as_secs() as i64,
            reject_cooldown_seconds: reject_cooldown.as_secs() as i64,
        }
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_seconds)
    }

    fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reject_cooldown_seconds)
    }
}

impl From<&AssignmentConfig> for LifecycleSettings {
    fn from(config: &AssignmentConfig) -> Self {
        Self::new(config.window, config.reject_cooldown)
    }
}

/// A new report entering the system.
#[derive(Debug, Clone, Default)]
pub struct NewIncident {
    pub external_id: Option<String>,
    pub source: String,
    pub text: String,
    pub voice_transcript: Option<String>,
    pub category_hint: Option<String>,
    pub place: String,
    pub latitude: f64,
    pub longitude: f64,
    pub people_affected: u32,
    pub notes: Option<String>,
}

/// The triplet an admin (or the auto-reassignment path) wants to install.
#[derive(Debug, Clone)]
pub struct CandidateSelection {
    pub organization_id: OrganizationId,
    pub division_id: Option<DivisionId>,
    pub staff_id: Option<StaffId>,
}

impl From<&Candidate> for CandidateSelection {
    fn from(candidate: &Candidate) -> Self {
        Self {
            organization_id: candidate.organization.id.clone(),
            division_id: candidate.division.as_ref().map(|d| d.id.clone()),
            staff_id: candidate.staff.as_ref().map(|s| s.id.clone()),
        }
    }
}

/// Bounded fields an admin or responder may edit outside the FSM.
#[derive(Debug, Clone, Default)]
pub struct IncidentUpdate {
    pub notes: Option<String>,
    pub place: Option<String>,
    pub people_affected: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReassignmentView {
    pub organization_id: OrganizationId,
    pub division_id: Option<DivisionId>,
    pub staff_id: Option<StaffId>,
    pub assignment_deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectOutcome {
    pub incident: Incident,
    pub reassigned_to: Option<ReassignmentView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FacilityMatch {
    pub facility: crate::domain::Facility,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearestFacilities {
    pub shelter: Option<FacilityMatch>,
    pub hospital: Option<FacilityMatch>,
}

pub struct LifecycleCoordinator {
    store: Arc<MemoryStore>,
    triage: Arc<TriageService>,
    engine: AssignmentEngine,
    settings: LifecycleSettings,
}

impl LifecycleCoordinator {
    pub fn new(
        store: Arc<MemoryStore>,
        triage: Arc<TriageService>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            triage,
            engine: AssignmentEngine::new(),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Create an incident with inline triage. Idempotent on `external_id`:
    /// resubmitting a known external id returns the existing ticket.
    pub async fn create(
        &self,
        principal: &Principal,
        draft: NewIncident,
        now: DateTime<Utc>,
    ) -> Result<Incident, CoreError> {
        authorize(principal, Action::CreateIncident, None)?;

        if draft.text.trim().is_empty() && draft.voice_transcript.as_deref().unwrap_or("").trim().is_empty()
        {
            return Err(CoreError::invalid_input("text", "report text or transcript required"));
        }
        if !valid_coordinates(draft.latitude, draft.longitude) {
            return Err(CoreError::invalid_input("latitude", "coordinates out of range"));
        }

        if let Some(external_id) = draft.external_id.as_deref() {
            if let Some(existing) = self
                .store
                .read(|state| state.incident_by_external_id(external_id).cloned())
            {
                return Ok(existing);
            }
        }

        let triage = self
            .triage
            .triage(&TriageInput {
                text: draft.text.clone(),
                voice_transcript: draft.voice_transcript.clone(),
                people: draft.people_affected,
                place: Some(draft.place.clone()).filter(|p| !p.is_empty()),
                category_hint: draft.category_hint.clone(),
            })
            .await;

        let principal_name = principal.username.clone();
        self.store.with_tx(move |state| {
            if let Some(external_id) = draft.external_id.as_deref() {
                if let Some(existing) = state.incident_by_external_id(external_id) {
                    return Ok(existing.clone());
                }
            }

            let incident = Incident {
                id: IncidentId::next(),
                external_id: draft.external_id,
                source: draft.source,
                text: draft.text,
                voice_transcript: draft.voice_transcript,
                category: triage.category.clone(),
                priority: triage.priority,
                place: draft.place,
                latitude: draft.latitude,
                longitude: draft.longitude,
                people_affected: draft.people_affected,
                status: IncidentStatus::Pending,
                assigned_organization_id: None,
                assigned_division_id: None,
                assigned_staff_id: None,
                assignment_deadline: None,
                estimated_completion: None,
                actual_completion: None,
                created_by: principal_name.clone(),
                notes: draft.notes,
                triage: Some(triage.clone()),
                created_at: now,
                updated_at: now,
            };
            state.append_audit(
                now,
                &principal_name,
                Some(&incident.id),
                AuditKind::Create,
                format!(
                    "category {} priority {} via {}",
                    triage.category,
                    triage.priority,
                    triage.source.label()
                ),
                None,
                Some(IncidentStatus::Pending),
            );
            state.incidents.insert(incident.id.clone(), incident.clone());
            info!(incident_id = %incident.id, category = %incident.category, "incident created");
            Ok(incident)
        })
    }

    pub fn get(&self, principal: &Principal, id: &IncidentId) -> Result<Incident, CoreError> {
        authorize(principal, Action::ViewIncidents, None)?;
        self.store.read(|state| state.incident(id).cloned())
    }

    pub fn list(&self, principal: &Principal, limit: usize, offset: usize) -> Result<Vec<Incident>, CoreError> {
        authorize(principal, Action::ViewIncidents, None)?;
        Ok(self.store.read(|state| {
            let mut incidents: Vec<Incident> = state.incidents.values().cloned().collect();
            incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
            incidents.into_iter().skip(offset).take(limit).collect()
        }))
    }

    /// Rank candidates for an incident, excluding cooled-down organisations.
    pub fn rank_candidates(
        &self,
        principal: &Principal,
        incident_id: &IncidentId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, CoreError> {
        authorize(principal, Action::RankCandidates, None)?;
        self.store.read(|state| {
            let incident = state.incident(incident_id)?;
            let context = AssignmentEngine::context_for(incident);
            let excluded: BTreeSet<OrganizationId> = state
                .cooled_down_organizations(incident_id, now)
                .into_iter()
                .collect();
            let snapshot = FleetSnapshot::capture(state, now);
            Ok(self.engine.rank(&context, &snapshot, &excluded))
        })
    }

    /// Install a candidate triplet and open the acceptance window.
    pub fn start_window(
        &self,
        principal: &Principal,
        incident_id: &IncidentId,
        selection: CandidateSelection,
        now: DateTime<Utc>,
    ) -> Result<Incident, CoreError> {
        authorize(principal, Action::StartWindow, None)?;
        let settings = self.settings;
        let principal_name = principal.username.clone();
        self.store.with_tx(move |state| {
            apply_window(state, incident_id, &selection, &principal_name, now, &settings)?;
            state.incident(incident_id).cloned()
        })
    }

    /// Accept an open assignment. Only the assigned responder may accept, and
    /// accepting an already-accepted ticket is a no-op.
    pub fn accept(
        &self,
        principal: &Principal,
        incident_id: &IncidentId,
        estimated_completion: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Incident, CoreError> {
        let principal = principal.clone();
        let settings = self.settings;
        self.store.with_tx(move |state| {
            let incident = state.incident(incident_id)?.clone();
            authorize(&principal, Action::AcceptAssignment, Some(&incident))?;

            if incident.status == IncidentStatus::InProgress {
                return Ok(incident);
            }

            match (incident.status, incident.assigned_organization_id.clone()) {
                (IncidentStatus::PendingAssignment, _) => {}
                // An assigned ticket still in Pending gets its window opened
                // implicitly by the acceptance itself.
                (IncidentStatus::Pending, Some(organization_id)) => {
                    let selection = CandidateSelection {
                        organization_id,
                        division_id: incident.assigned_division_id.clone(),
                        staff_id: incident.assigned_staff_id.clone(),
                    };
                    apply_window(state, incident_id, &selection, &principal.username, now, &settings)?;
                }
                (other, _) => {
                    return Err(CoreError::invalid_state(other.label(), "accept"));
                }
            }

            let incident = state.incident(incident_id)?;
            if let Some(deadline) = incident.assignment_deadline {
                if deadline < now {
                    return Err(CoreError::Conflict(
                        "assignment window expired; awaiting reassignment".to_string(),
                    ));
                }
            }

            let staff_id = incident
                .assigned_staff_id
                .clone()
                .ok_or_else(|| CoreError::invalid_state("pending_assignment", "accept"))?;
            let staff = state.staff_member_mut(&staff_id)?;
            staff.availability = Availability::Busy;
            staff.updated_at = now;

            let incident = state.incident_mut(incident_id)?;
            let before = incident.status;
            incident.status = IncidentStatus::InProgress;
            incident.estimated_completion = estimated_completion;
            incident.assignment_deadline = None;
            incident.updated_at = now;
            let snapshot = incident.clone();

            state.append_audit(
                now,
                &principal.username,
                Some(incident_id),
                AuditKind::Accept,
                format!("accepted by staff {staff_id}"),
                Some(before),
                Some(IncidentStatus::InProgress),
            );
            Ok(snapshot)
        })
    }

    /// Reject an open assignment, release its capacity, and immediately try
    /// the next best candidate with the rejecting organisation excluded.
    pub fn reject(
        &self,
        principal: &Principal,
        incident_id: &IncidentId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RejectOutcome, CoreError> {
        let principal = principal.clone();
        let reason = reason.to_string();
        let settings = self.settings;
        let engine = self.engine;
        self.store.with_tx(move |state| {
            let incident = state.incident(incident_id)?.clone();
            authorize(&principal, Action::RejectAssignment, Some(&incident))?;

            if incident.status != IncidentStatus::PendingAssignment {
                return Err(CoreError::invalid_state(incident.status.label(), "reject"));
            }

            release_assignment(
                state,
                incident_id,
                &principal.username,
                AuditKind::Reject,
                &reason,
                IncidentStatus::Pending,
                now,
                &settings,
            )?;

            let reassigned_to = reassign_next_best(state, incident_id, &engine, now, &settings)?;
            let incident = state.incident(incident_id)?.clone();
            Ok(RejectOutcome {
                incident,
                reassigned_to,
            })
        })
    }

    /// Complete an in-progress incident and release its capacity.
    pub fn complete(
        &self,
        principal: &Principal,
        incident_id: &IncidentId,
        now: DateTime<Utc>,
    ) -> Result<Incident, CoreError> {
        let principal = principal.clone();
        self.store.with_tx(move |state| {
            let incident = state.incident(incident_id)?.clone();
            authorize(&principal, Action::CompleteAssignment, Some(&incident))?;

            if incident.status != IncidentStatus::InProgress {
                return Err(CoreError::invalid_state(incident.status.label(), "complete"));
            }

            let triplet = incident.assignment();
            workload::release(
                state,
                incident_id,
                triplet.organization_id.as_ref(),
                triplet.division_id.as_ref(),
                triplet.staff_id.as_ref(),
                now,
            )?;

            let incident = state.incident_mut(incident_id)?;
            let before = incident.status;
            incident.status = IncidentStatus::Done;
            incident.actual_completion = Some(now);
            incident.updated_at = now;
            let snapshot = incident.clone();

            state.append_audit(
                now,
                &principal.username,
                Some(incident_id),
                AuditKind::Complete,
                "response completed",
                Some(before),
                Some(IncidentStatus::Done),
            );
            Ok(snapshot)
        })
    }

    /// Admin cancellation; releases capacity identically to completion.
    pub fn cancel(
        &self,
        principal: &Principal,
        incident_id: &IncidentId,
        now: DateTime<Utc>,
    ) -> Result<Incident, CoreError> {
        authorize(principal, Action::CancelIncident, None)?;
        let principal_name = principal.username.clone();
        self.store.with_tx(move |state| {
            let incident = state.incident(incident_id)?.clone();
            if incident.status.is_terminal() {
                return Err(CoreError::invalid_state(incident.status.label(), "cancel"));
            }

            if incident.status.holds_capacity() {
                let triplet = incident.assignment();
                workload::release(
                    state,
                    incident_id,
                    triplet.organization_id.as_ref(),
                    triplet.division_id.as_ref(),
                    triplet.staff_id.as_ref(),
                    now,
                )?;
            }

            let incident = state.incident_mut(incident_id)?;
            let before = incident.status;
            incident.status = IncidentStatus::Cancelled;
            incident.assignment_deadline = None;
            incident.updated_at = now;
            let snapshot = incident.clone();

            state.append_audit(
                now,
                &principal_name,
                Some(incident_id),
                AuditKind::Cancel,
                "cancelled by admin",
                Some(before),
                Some(IncidentStatus::Cancelled),
            );
            Ok(snapshot)
        })
    }

    /// Bounded edits that never touch the FSM.
    pub fn update(
        &self,
        principal: &Principal,
        incident_id: &IncidentId,
        update: IncidentUpdate,
        now: DateTime<Utc>,
    ) -> Result<Incident, CoreError> {
        authorize(principal, Action::UpdateIncident, None)?;
        let principal_name = principal.username.clone();
        self.store.with_tx(move |state| {
            let incident = state.incident_mut(incident_id)?;
            if let Some(notes) = update.notes {
                incident.notes = Some(notes);
            }
            if let Some(place) = update.place {
                incident.place = place;
            }
            if let Some(people) = update.people_affected {
                incident.people_affected = people;
            }
            incident.updated_at = now;
            let snapshot = incident.clone();
            state.append_audit(
                now,
                &principal_name,
                Some(incident_id),
                AuditKind::Update,
                "fields updated",
                None,
                None,
            );
            Ok(snapshot)
        })
    }

    /// Admin-only hard removal. Capacity is released first so counters stay
    /// consistent with the remaining incidents.
    pub fn remove(
        &self,
        principal: &Principal,
        incident_id: &IncidentId,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        authorize(principal, Action::DeleteIncident, None)?;
        let principal_name = principal.username.clone();
        self.store.with_tx(move |state| {
            let incident = state.incident(incident_id)?.clone();
            if incident.status.holds_capacity() {
                let triplet = incident.assignment();
                workload::release(
                    state,
                    incident_id,
                    triplet.organization_id.as_ref(),
                    triplet.division_id.as_ref(),
                    triplet.staff_id.as_ref(),
                    now,
                )?;
            }
            state.incidents.remove(incident_id);
            state.append_audit(
                now,
                &principal_name,
                Some(incident_id),
                AuditKind::Remove,
                "incident removed",
                Some(incident.status),
                None,
            );
            Ok(())
        })
    }

    /// Auto-reject expired assignment windows and re-rank. An incident
    /// accepted in the same tick is no longer `PendingAssignment` and is
    /// left untouched.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<IncidentId>, CoreError> {
        let settings = self.settings;
        let engine = self.engine;
        self.store.with_tx(move |state| {
            state.prune_expired_cooldowns(now);
            let expired: Vec<IncidentId> = state
                .incidents
                .values()
                .filter(|incident| incident.status == IncidentStatus::PendingAssignment)
                .filter(|incident| {
                    incident
                        .assignment_deadline
                        .map(|deadline| deadline < now)
                        .unwrap_or(false)
                })
                .map(|incident| incident.id.clone())
                .collect();

            for incident_id in &expired {
                warn!(incident_id = %incident_id, "assignment window expired, auto-rejecting");
                release_assignment(
                    state,
                    incident_id,
                    "system",
                    AuditKind::AutoReject,
                    "timeout",
                    IncidentStatus::Pending,
                    now,
                    &settings,
                )?;
                reassign_next_best(state, incident_id, &engine, now, &settings)?;
            }
            Ok(expired)
        })
    }

    pub fn nearest_facilities(
        &self,
        principal: &Principal,
        incident_id: &IncidentId,
    ) -> Result<NearestFacilities, CoreError> {
        authorize(principal, Action::ViewIncidents, None)?;
        self.store.read(|state| {
            let incident = state.incident(incident_id)?;
            let shelter = state
                .nearest_facility(FacilityKind::Shelter, incident.latitude, incident.longitude)
                .map(|(facility, distance_km)| FacilityMatch {
                    facility: facility.clone(),
                    distance_km,
                });
            let hospital = state
                .nearest_facility(FacilityKind::Hospital, incident.latitude, incident.longitude)
                .map(|(facility, distance_km)| FacilityMatch {
                    facility: facility.clone(),
                    distance_km,
                });
            Ok(NearestFacilities { shelter, hospital })
        })
    }
}

/// Shared window-opening path for `start_window`, implicit acceptance, and
/// auto-reassignment. Runs inside the caller's transaction.
fn apply_window(
    state: &mut StoreState,
    incident_id: &IncidentId,
    selection: &CandidateSelection,
    principal_name: &str,
    now: DateTime<Utc>,
    settings: &LifecycleSettings,
) -> Result<(), CoreError> {
    let incident = state.incident(incident_id)?;
    if incident.status != IncidentStatus::Pending {
        return Err(CoreError::invalid_state(incident.status.label(), "start_window"));
    }

    // Re-validate the chosen rows against the live state; the ranking ran on
    // a snapshot that may have gone stale.
    let organization = state.organization(&selection.organization_id)?;
    if organization.status == CapacityStatus::Inactive {
        return Err(CoreError::StaleSnapshot(format!(
            "organization {} became inactive",
            selection.organization_id
        )));
    }
    if let Some(division_id) = &selection.division_id {
        let division = state.division(division_id)?;
        if division.organization_id != selection.organization_id {
            return Err(CoreError::invalid_input(
                "division_id",
                "division does not belong to the selected organization",
            ));
        }
        if division.status == CapacityStatus::Inactive {
            return Err(CoreError::StaleSnapshot(format!(
                "division {division_id} became inactive"
            )));
        }
    }
    if let Some(staff_id) = &selection.staff_id {
        let staff = state.staff_member(staff_id)?;
        if staff.organization_id != selection.organization_id {
            return Err(CoreError::invalid_input(
                "staff_id",
                "staff member does not belong to the selected organization",
            ));
        }
        if staff.status == crate::domain::ActivityStatus::Inactive
            || staff.availability != Availability::Available
        {
            return Err(CoreError::StaleSnapshot(format!(
                "staff {staff_id} is no longer available"
            )));
        }
    }

    // Org and division take load now; the staff member only turns busy on
    // acceptance.
    workload::acquire(
        state,
        &selection.organization_id,
        selection.division_id.as_ref(),
        None,
        now,
    )?;

    let deadline = now + settings.window();
    let incident = state.incident_mut(incident_id)?;
    let before = incident.status;
    incident.assigned_organization_id = Some(selection.organization_id.clone());
    incident.assigned_division_id = selection.division_id.clone();
    incident.assigned_staff_id = selection.staff_id.clone();
    incident.assignment_deadline = Some(deadline);
    incident.status = IncidentStatus::PendingAssignment;
    incident.updated_at = now;

    state.append_audit(
        now,
        principal_name,
        Some(incident_id),
        AuditKind::StartWindow,
        format!(
            "organization {} staff {}",
            selection.organization_id,
            selection
                .staff_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "unassigned".to_string())
        ),
        Some(before),
        Some(IncidentStatus::PendingAssignment),
    );
    Ok(())
}

/// Release an open assignment back to `Pending` and mark the rejecting
/// organisation's cooldown.
#[allow(clippy::too_many_arguments)]
fn release_assignment(
    state: &mut StoreState,
    incident_id: &IncidentId,
    principal_name: &str,
    kind: AuditKind,
    reason: &str,
    next_status: IncidentStatus,
    now: DateTime<Utc>,
    settings: &LifecycleSettings,
) -> Result<(), CoreError> {
    let incident = state.incident(incident_id)?.clone();
    let triplet = incident.assignment();

    workload::release(
        state,
        incident_id,
        triplet.organization_id.as_ref(),
        triplet.division_id.as_ref(),
        triplet.staff_id.as_ref(),
        now,
    )?;

    if let Some(org_id) = &triplet.organization_id {
        state.cooldowns.insert(
            (incident_id.clone(), org_id.clone()),
            now + settings.cooldown(),
        );
    }

    let before = incident.status;
    let incident = state.incident_mut(incident_id)?;
    incident.clear_assignment();
    incident.status = next_status;
    incident.updated_at = now;

    state.append_audit(
        now,
        principal_name,
        Some(incident_id),
        kind,
        format!(
            "organization {} rejected: {reason}",
            triplet
                .organization_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "unassigned".to_string())
        ),
        Some(before),
        Some(next_status),
    );
    Ok(())
}

/// Rank against the current state and open a fresh window on the best
/// non-cooled-down candidate, if any.
fn reassign_next_best(
    state: &mut StoreState,
    incident_id: &IncidentId,
    engine: &AssignmentEngine,
    now: DateTime<Utc>,
    settings: &LifecycleSettings,
) -> Result<Option<ReassignmentView>, CoreError> {
    let incident = state.incident(incident_id)?;
    let context = AssignmentEngine::context_for(incident);
    let excluded: BTreeSet<OrganizationId> = state
        .cooled_down_organizations(incident_id, now)
        .into_iter()
        .collect();
    let snapshot = FleetSnapshot::capture(state, now);
    let ranked = engine.rank(&context, &snapshot, &excluded);

    let Some(best) = ranked.first() else {
        info!(incident_id = %incident_id, "no eligible candidate after rejection");
        return Ok(None);
    };

    let selection = CandidateSelection::from(best);
    apply_window(state, incident_id, &selection, "system", now, settings)?;
    let deadline = state
        .incident(incident_id)?
        .assignment_deadline
        .ok_or_else(|| CoreError::Internal("assignment window missing after open".to_string()))?;

    Ok(Some(ReassignmentView {
        organization_id: selection.organization_id,
        division_id: selection.division_id,
        staff_id: selection.staff_id,
        assignment_deadline: deadline,
    }))
}
