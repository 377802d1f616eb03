//! Persistent records owned by the store: incidents, the response fleet,
//! facilities, dispatch jobs, and the append-only audit log.

mod ids;

pub use ids::{DivisionId, FacilityId, IncidentId, JobId, OrganizationId, StaffId};

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-incident lifecycle states. `Pending` and `PendingAssignment` are
/// distinct persisted values; only `start_window` moves a ticket into the
/// latter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Pending,
    PendingAssignment,
    InProgress,
    Done,
    Cancelled,
}

impl IncidentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            IncidentStatus::Pending => "pending",
            IncidentStatus::PendingAssignment => "pending_assignment",
            IncidentStatus::InProgress => "in_progress",
            IncidentStatus::Done => "done",
            IncidentStatus::Cancelled => "cancelled",
        }
    }

    /// States that hold fleet capacity.
    pub const fn holds_capacity(self) -> bool {
        matches!(
            self,
            IncidentStatus::PendingAssignment | IncidentStatus::InProgress
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, IncidentStatus::Done | IncidentStatus::Cancelled)
    }
}

/// Where the triage verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageSource {
    Llm,
    Rules,
}

impl TriageSource {
    pub const fn label(self) -> &'static str {
        match self {
            TriageSource::Llm => "llm",
            TriageSource::Rules => "rules",
        }
    }
}

/// Classification of an incident produced by the triage service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub category: String,
    pub priority: u8,
    pub required_division_type: DivisionType,
    pub required_skills: BTreeSet<String>,
    pub source: TriageSource,
    pub confidence: f32,
}

/// A single emergency report tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub external_id: Option<String>,
    pub source: String,
    pub text: String,
    pub voice_transcript: Option<String>,
    pub category: String,
    pub priority: u8,
    pub place: String,
    pub latitude: f64,
    pub longitude: f64,
    pub people_affected: u32,
    pub status: IncidentStatus,
    pub assigned_organization_id: Option<OrganizationId>,
    pub assigned_division_id: Option<DivisionId>,
    pub assigned_staff_id: Option<StaffId>,
    pub assignment_deadline: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub actual_completion: Option<DateTime<Utc>>,
    pub created_by: String,
    pub notes: Option<String>,
    pub triage: Option<TriageResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn assignment(&self) -> AssignmentTriplet {
        AssignmentTriplet {
            organization_id: self.assigned_organization_id.clone(),
            division_id: self.assigned_division_id.clone(),
            staff_id: self.assigned_staff_id.clone(),
        }
    }

    pub fn clear_assignment(&mut self) {
        self.assigned_organization_id = None;
        self.assigned_division_id = None;
        self.assigned_staff_id = None;
        self.assignment_deadline = None;
    }
}

/// The (org, division?, staff?) selection carried by a ticket while it holds
/// capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentTriplet {
    pub organization_id: Option<OrganizationId>,
    pub division_id: Option<DivisionId>,
    pub staff_id: Option<StaffId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationType {
    Government,
    Ngo,
    VolunteerGroup,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationCategory {
    EmergencyResponse,
    Medical,
    Relief,
    Logistics,
    Rescue,
    Infrastructure,
}

/// Load-derived status for organisations and divisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityStatus {
    Active,
    Available,
    Overloaded,
    Inactive,
}

impl CapacityStatus {
    pub const fn label(self) -> &'static str {
        match self {
            CapacityStatus::Active => "active",
            CapacityStatus::Available => "available",
            CapacityStatus::Overloaded => "overloaded",
            CapacityStatus::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub org_type: OrganizationType,
    pub category: OrganizationCategory,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity: u32,
    pub current_load: u32,
    pub status: CapacityStatus,
    pub contact_person: Option<String>,
    pub contact_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// Free slots, saturating at zero once overloaded.
    pub fn headroom(&self) -> u32 {
        self.capacity.saturating_sub(self.current_load)
    }

    pub fn at_capacity(&self) -> bool {
        self.capacity > 0 && self.current_load >= self.capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivisionType {
    Medical,
    Rescue,
    Logistics,
    Communication,
    EmergencyResponse,
}

impl DivisionType {
    pub const fn label(self) -> &'static str {
        match self {
            DivisionType::Medical => "medical",
            DivisionType::Rescue => "rescue",
            DivisionType::Logistics => "logistics",
            DivisionType::Communication => "communication",
            DivisionType::EmergencyResponse => "emergency_response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Division {
    pub id: DivisionId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub division_type: DivisionType,
    pub description: Option<String>,
    pub skills: BTreeSet<String>,
    pub capacity: u32,
    pub current_load: u32,
    pub status: CapacityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Division {
    pub fn headroom(&self) -> u32 {
        self.capacity.saturating_sub(self.current_load)
    }

    pub fn at_capacity(&self) -> bool {
        self.capacity > 0 && self.current_load >= self.capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Manager,
    Specialist,
    Worker,
    Volunteer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Busy,
    OffDuty,
}

impl Availability {
    pub const fn label(self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::Busy => "busy",
            Availability::OffDuty => "off_duty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staff {
    pub id: StaffId,
    pub organization_id: OrganizationId,
    pub division_id: Option<DivisionId>,
    pub name: String,
    pub role: StaffRole,
    pub skills: BTreeSet<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub availability: Availability,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: ActivityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Staff {
    pub fn location(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityKind {
    Shelter,
    Hospital,
}

/// Read-only shelters and hospitals used by the nearest-facility query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub id: FacilityId,
    pub kind: FacilityKind,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity: u32,
    pub occupancy: u32,
    pub beds_available: Option<u32>,
    pub icu_beds: Option<u32>,
}

/// Outbound delivery lanes; `P0` drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    P0,
    P1,
    P2,
    P3,
}

impl Lane {
    pub const ALL: [Lane; 4] = [Lane::P0, Lane::P1, Lane::P2, Lane::P3];

    pub const fn label(self) -> &'static str {
        match self {
            Lane::P0 => "p0",
            Lane::P1 => "p1",
            Lane::P2 => "p2",
            Lane::P3 => "p3",
        }
    }

    /// One lane lower, saturating at `P3`.
    pub const fn downgraded(self) -> Lane {
        match self {
            Lane::P0 => Lane::P1,
            Lane::P1 => Lane::P2,
            Lane::P2 | Lane::P3 => Lane::P3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    InFlight,
    Delivered,
    FailedTerminal,
}

impl JobState {
    pub const fn label(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::InFlight => "in_flight",
            JobState::Delivered => "delivered",
            JobState::FailedTerminal => "failed_terminal",
        }
    }
}

/// One durable unit of work for the dispatch worker pool. A given idempotency
/// key maps to at most one job, and at most one downstream incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchJob {
    pub id: JobId,
    pub client_ticket_id: String,
    pub idempotency_key: String,
    pub lane: Lane,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub state: JobState,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
    pub delivered_ticket_id: Option<String>,
    pub requires_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Create,
    StartWindow,
    Accept,
    Reject,
    AutoReject,
    Complete,
    Cancel,
    Update,
    Remove,
    Reconcile,
    DispatchFailure,
}

/// Append-only audit record; never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub principal: String,
    pub incident_id: Option<IncidentId>,
    pub kind: AuditKind,
    pub detail: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Citizen follow-up conversation attached to a mobile ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub client_ticket_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatAuthor {
    Citizen,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: ChatAuthor,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Trace of one mobile submission, kept for duplicate-density and fraud
/// signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeTrace {
    pub at: DateTime<Utc>,
    pub idempotency_key: String,
    pub device_id_hash: String,
    pub client_ip: String,
    pub normalized_text: String,
    pub media_digests: Vec<String>,
    pub latitude: f64,
    pub longitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_holding_states() {
        assert!(!IncidentStatus::Pending.holds_capacity());
        assert!(IncidentStatus::PendingAssignment.holds_capacity());
        assert!(IncidentStatus::InProgress.holds_capacity());
        assert!(!IncidentStatus::Done.holds_capacity());
    }

    #[test]
    fn lane_downgrade_saturates() {
        assert_eq!(Lane::P1.downgraded(), Lane::P2);
        assert_eq!(Lane::P3.downgraded(), Lane::P3);
    }

    #[test]
    fn org_headroom_saturates_at_zero() {
        let now = Utc::now();
        let org = Organization {
            id: OrganizationId::from("org-x"),
            name: "Relief Corps".to_string(),
            org_type: OrganizationType::Ngo,
            category: OrganizationCategory::Relief,
            region: "north".to_string(),
            latitude: 17.4,
            longitude: 78.5,
            capacity: 2,
            current_load: 3,
            status: CapacityStatus::Overloaded,
            contact_person: None,
            contact_phone: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(org.headroom(), 0);
        assert!(org.at_capacity());
    }

    #[test]
    fn triage_result_round_trips_through_json() {
        let result = TriageResult {
            category: "Flood Rescue".to_string(),
            priority: 5,
            required_division_type: DivisionType::Rescue,
            required_skills: ["rescue", "boat"].iter().map(|s| s.to_string()).collect(),
            source: TriageSource::Rules,
            confidence: 0.71,
        };
        let encoded = serde_json::to_string(&result).expect("serializes");
        let decoded: TriageResult = serde_json::from_str(&encoded).expect("deserializes");
        assert_eq!(decoded, result);
    }
}
