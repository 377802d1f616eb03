//! Centralised authorisation for lifecycle transitions. Every role and
//! ownership check funnels through [`authorize`] so handlers carry no
//! free-form role logic.

use crate::domain::Incident;
use crate::error::CoreError;
use crate::identity::{Principal, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateIncident,
    ViewIncidents,
    UpdateIncident,
    DeleteIncident,
    RankCandidates,
    StartWindow,
    AcceptAssignment,
    RejectAssignment,
    CompleteAssignment,
    CancelIncident,
    ManageFleet,
    RetryDispatch,
    IngestTicket,
}

impl Action {
    pub const fn rule(self) -> &'static str {
        match self {
            Action::CreateIncident => "incident_write_roles",
            Action::ViewIncidents => "authenticated_read",
            Action::UpdateIncident => "incident_write_roles",
            Action::RankCandidates => "dispatch_roles",
            Action::DeleteIncident => "admin_only",
            Action::StartWindow => "admin_only",
            Action::AcceptAssignment
            | Action::RejectAssignment
            | Action::CompleteAssignment => "assigned_responder_only",
            Action::CancelIncident => "admin_only",
            Action::ManageFleet => "admin_only",
            Action::RetryDispatch => "admin_only",
            Action::IngestTicket => "trusted_caller",
        }
    }
}

/// Allow or deny an action for a principal, optionally against a specific
/// incident (ownership checks need one).
pub fn authorize(
    principal: &Principal,
    action: Action,
    incident: Option<&Incident>,
) -> Result<(), CoreError> {
    let allowed = match action {
        Action::ViewIncidents => true,
        Action::CreateIncident | Action::UpdateIncident => {
            matches!(principal.role, Role::Admin | Role::Responder | Role::Service)
        }
        Action::RankCandidates => {
            matches!(principal.role, Role::Admin | Role::Responder)
        }
        Action::DeleteIncident
        | Action::StartWindow
        | Action::CancelIncident
        | Action::ManageFleet
        | Action::RetryDispatch => principal.role == Role::Admin,
        Action::IngestTicket => matches!(principal.role, Role::Admin | Role::Service),
        Action::AcceptAssignment | Action::RejectAssignment | Action::CompleteAssignment => {
            let incident = incident.ok_or_else(|| {
                CoreError::Internal("assignment action authorised without incident".to_string())
            })?;
            principal.role == Role::Responder
                && principal.staff_id.is_some()
                && incident.assigned_staff_id == principal.staff_id
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(CoreError::forbidden(action.rule()))
    }
}
