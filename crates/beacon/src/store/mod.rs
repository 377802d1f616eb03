//! Authoritative in-process state and its transaction discipline.
//!
//! All mutation funnels through [`MemoryStore::with_tx`]: the closure runs
//! against a draft copy of the state and the draft replaces the live state
//! only when the closure succeeds, so a failed transition never leaves a
//! half-applied workload delta behind. Holding the single writer lock for the
//! duration of a transaction is this backing store's equivalent of a per-row
//! `FOR UPDATE` lock: transitions on one incident are totally ordered, and a
//! queue claim can never hand the same job to two workers.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::domain::{
    AuditEvent, AuditKind, ChatSession, DispatchJob, Division, DivisionId, Facility, FacilityId,
    FacilityKind, Incident, IncidentId, IncidentStatus, IntakeTrace, JobId, Organization,
    OrganizationId, Staff, StaffId,
};
use crate::error::CoreError;
use crate::geo::haversine_m;

/// Every table owned by the store. Cloneable so a transaction can work on a
/// draft and commit by swap.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub incidents: BTreeMap<IncidentId, Incident>,
    pub organizations: BTreeMap<OrganizationId, Organization>,
    pub divisions: BTreeMap<DivisionId, Division>,
    pub staff: BTreeMap<StaffId, Staff>,
    pub facilities: BTreeMap<FacilityId, Facility>,
    pub jobs: BTreeMap<JobId, DispatchJob>,
    pub jobs_by_key: BTreeMap<String, JobId>,
    pub audit: Vec<AuditEvent>,
    pub audit_seq: u64,
    /// Organisations excluded from re-ranking per incident until the marked
    /// instant.
    pub cooldowns: BTreeMap<(IncidentId, OrganizationId), DateTime<Utc>>,
    pub chat_sessions: BTreeMap<String, ChatSession>,
    pub intake_traces: Vec<IntakeTrace>,
    /// Monotonic claim counter driving the dispatch fairness ticket.
    pub claim_counter: u64,
}

impl StoreState {
    pub fn incident(&self, id: &IncidentId) -> Result<&Incident, CoreError> {
        self.incidents
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("incident {id}")))
    }

    pub fn incident_mut(&mut self, id: &IncidentId) -> Result<&mut Incident, CoreError> {
        self.incidents
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("incident {id}")))
    }

    pub fn organization(&self, id: &OrganizationId) -> Result<&Organization, CoreError> {
        self.organizations
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("organization {id}")))
    }

    pub fn organization_mut(&mut self, id: &OrganizationId) -> Result<&mut Organization, CoreError> {
        self.organizations
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("organization {id}")))
    }

    pub fn division(&self, id: &DivisionId) -> Result<&Division, CoreError> {
        self.divisions
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("division {id}")))
    }

    pub fn division_mut(&mut self, id: &DivisionId) -> Result<&mut Division, CoreError> {
        self.divisions
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("division {id}")))
    }

    pub fn staff_member(&self, id: &StaffId) -> Result<&Staff, CoreError> {
        self.staff
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("staff {id}")))
    }

    pub fn staff_member_mut(&mut self, id: &StaffId) -> Result<&mut Staff, CoreError> {
        self.staff
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("staff {id}")))
    }

    pub fn job(&self, id: &JobId) -> Result<&DispatchJob, CoreError> {
        self.jobs
            .get(id)
            .ok_or_else(|| CoreError::NotFound(format!("dispatch job {id}")))
    }

    pub fn job_mut(&mut self, id: &JobId) -> Result<&mut DispatchJob, CoreError> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("dispatch job {id}")))
    }

    pub fn incident_by_external_id(&self, external_id: &str) -> Option<&Incident> {
        self.incidents
            .values()
            .find(|incident| incident.external_id.as_deref() == Some(external_id))
    }

    /// Incidents created since `since` within `radius_m` of the coordinate,
    /// nearest first. Used by the duplicate-density check.
    pub fn incidents_near(
        &self,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
        since: DateTime<Utc>,
    ) -> Vec<(&Incident, f64)> {
        let mut hits: Vec<(&Incident, f64)> = self
            .incidents
            .values()
            .filter(|incident| incident.created_at >= since)
            .filter_map(|incident| {
                let distance =
                    haversine_m(latitude, longitude, incident.latitude, incident.longitude);
                (distance <= radius_m).then_some((incident, distance))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        hits
    }

    pub fn nearest_facility(
        &self,
        kind: FacilityKind,
        latitude: f64,
        longitude: f64,
    ) -> Option<(&Facility, f64)> {
        self.facilities
            .values()
            .filter(|facility| facility.kind == kind)
            .map(|facility| {
                let km = haversine_m(latitude, longitude, facility.latitude, facility.longitude)
                    / 1000.0;
                (facility, km)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)))
    }

    /// Number of capacity-holding incidents currently assigned to the staff
    /// member, optionally ignoring one incident (the one being released).
    pub fn active_assignments_for_staff(
        &self,
        staff_id: &StaffId,
        excluding: Option<&IncidentId>,
    ) -> usize {
        self.incidents
            .values()
            .filter(|incident| Some(&incident.id) != excluding)
            .filter(|incident| incident.status.holds_capacity())
            .filter(|incident| incident.assigned_staff_id.as_ref() == Some(staff_id))
            .count()
    }

    pub fn append_audit(
        &mut self,
        at: DateTime<Utc>,
        principal: &str,
        incident_id: Option<&IncidentId>,
        kind: AuditKind,
        detail: impl Into<String>,
        before: Option<IncidentStatus>,
        after: Option<IncidentStatus>,
    ) {
        self.audit_seq += 1;
        self.audit.push(AuditEvent {
            seq: self.audit_seq,
            at,
            principal: principal.to_string(),
            incident_id: incident_id.cloned(),
            kind,
            detail: detail.into(),
            before: before.map(|status| status.label().to_string()),
            after: after.map(|status| status.label().to_string()),
        });
    }

    /// Organisations currently excluded from re-ranking for an incident.
    pub fn cooled_down_organizations(
        &self,
        incident_id: &IncidentId,
        now: DateTime<Utc>,
    ) -> Vec<OrganizationId> {
        self.cooldowns
            .iter()
            .filter(|((incident, _), until)| incident == incident_id && **until > now)
            .map(|((_, org), _)| org.clone())
            .collect()
    }

    pub fn prune_expired_cooldowns(&mut self, now: DateTime<Utc>) {
        self.cooldowns.retain(|_, until| *until > now);
    }
}

/// Single-writer store with snapshot-commit transactions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against a draft of the state; commit the draft only on `Ok`.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut live = self.state.lock().expect("store mutex poisoned");
        let mut draft = live.clone();
        match f(&mut draft) {
            Ok(value) => {
                *live = draft;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// Consistent read against the live state.
    pub fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        let live = self.state.lock().expect("store mutex poisoned");
        f(&live)
    }
}
