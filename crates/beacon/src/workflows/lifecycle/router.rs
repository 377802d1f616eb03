//! HTTP surface for incident tickets and the assignment lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    CandidateSelection, IncidentUpdate, LifecycleCoordinator, NearestFacilities, NewIncident,
    RejectOutcome,
};
use crate::domain::{Incident, IncidentId, IncidentStatus};
use crate::error::CoreError;
use crate::identity::Principal;
use crate::workflows::assignment::Candidate;

pub fn sos_router(coordinator: Arc<LifecycleCoordinator>) -> Router {
    Router::new()
        .route("/sos", post(create_sos).get(list_sos))
        .route("/sos/intake", post(intake_sos))
        .route("/sos/map", get(map_view))
        .route(
            "/sos/:id",
            get(get_sos).put(update_sos).delete(delete_sos),
        )
        .route("/sos/:id/nearest-facilities", get(nearest_facilities))
        .with_state(coordinator)
}

pub fn emergency_router(coordinator: Arc<LifecycleCoordinator>) -> Router {
    Router::new()
        .route("/emergency/smart-assignment", get(smart_assignment))
        .route("/emergency/assign-emergency", post(assign_emergency))
        .route("/emergency/accept-assignment", post(accept_assignment))
        .route("/emergency/reject-assignment", post(reject_assignment))
        .route("/emergency/complete-emergency", post(complete_emergency))
        .route("/emergency/emergency-summary", get(emergency_summary))
        .route("/emergency/response-status/:id", get(response_status))
        .with_state(coordinator)
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateSosRequest {
    pub external_id: Option<String>,
    pub text: String,
    pub voice_transcript: Option<String>,
    pub category_hint: Option<String>,
    #[serde(default)]
    pub place: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub people_affected: u32,
    pub notes: Option<String>,
}

impl CreateSosRequest {
    fn into_new_incident(self, source: &str) -> NewIncident {
        NewIncident {
            external_id: self.external_id,
            source: source.to_string(),
            text: self.text,
            voice_transcript: self.voice_transcript,
            category_hint: self.category_hint,
            place: self.place,
            latitude: self.latitude,
            longitude: self.longitude,
            people_affected: self.people_affected,
            notes: self.notes,
        }
    }
}

async fn create_sos(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Json(request): Json<CreateSosRequest>,
) -> Result<Json<Incident>, CoreError> {
    let incident = coordinator
        .create(&principal, request.into_new_incident("admin_console"), Utc::now())
        .await?;
    Ok(Json(incident))
}

async fn intake_sos(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Json(request): Json<CreateSosRequest>,
) -> Result<Json<Incident>, CoreError> {
    let incident = coordinator
        .create(&principal, request.into_new_incident("intake"), Utc::now())
        .await?;
    Ok(Json(incident))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_sos(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Incident>>, CoreError> {
    let incidents = coordinator.list(
        &principal,
        query.limit.unwrap_or(100),
        query.offset.unwrap_or(0),
    )?;
    Ok(Json(incidents))
}

async fn get_sos(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<Incident>, CoreError> {
    Ok(Json(coordinator.get(&principal, &IncidentId(id))?))
}

#[derive(Debug, Serialize)]
struct MapPoint {
    id: IncidentId,
    latitude: f64,
    longitude: f64,
    status: IncidentStatus,
    priority: u8,
    category: String,
}

async fn map_view(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
) -> Result<Json<Vec<MapPoint>>, CoreError> {
    let incidents = coordinator.list(&principal, usize::MAX, 0)?;
    let points = incidents
        .into_iter()
        .map(|incident| MapPoint {
            id: incident.id,
            latitude: incident.latitude,
            longitude: incident.longitude,
            status: incident.status,
            priority: incident.priority,
            category: incident.category,
        })
        .collect();
    Ok(Json(points))
}

#[derive(Debug, Deserialize)]
struct UpdateSosRequest {
    notes: Option<String>,
    place: Option<String>,
    people_affected: Option<u32>,
}

async fn update_sos(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(request): Json<UpdateSosRequest>,
) -> Result<Json<Incident>, CoreError> {
    let incident = coordinator.update(
        &principal,
        &IncidentId(id),
        IncidentUpdate {
            notes: request.notes,
            place: request.place,
            people_affected: request.people_affected,
        },
        Utc::now(),
    )?;
    Ok(Json(incident))
}

async fn delete_sos(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    coordinator.remove(&principal, &IncidentId(id), Utc::now())?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

async fn nearest_facilities(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<NearestFacilities>, CoreError> {
    Ok(Json(coordinator.nearest_facilities(&principal, &IncidentId(id))?))
}

#[derive(Debug, Deserialize)]
struct SmartAssignmentQuery {
    sos_id: String,
}

#[derive(Debug, Serialize)]
struct SmartAssignmentView {
    best: Option<Candidate>,
    alternatives: Vec<Candidate>,
}

async fn smart_assignment(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Query(query): Query<SmartAssignmentQuery>,
) -> Result<Json<SmartAssignmentView>, CoreError> {
    let mut ranked =
        coordinator.rank_candidates(&principal, &IncidentId(query.sos_id), Utc::now())?;
    let best = if ranked.is_empty() {
        None
    } else {
        Some(ranked.remove(0))
    };
    ranked.truncate(3);
    Ok(Json(SmartAssignmentView {
        best,
        alternatives: ranked,
    }))
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    sos_id: String,
    organization_id: String,
    division_id: Option<String>,
    staff_id: Option<String>,
}

async fn assign_emergency(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Incident>, CoreError> {
    let selection = CandidateSelection {
        organization_id: crate::domain::OrganizationId(request.organization_id),
        division_id: request.division_id.map(crate::domain::DivisionId),
        staff_id: request.staff_id.map(crate::domain::StaffId),
    };
    let incident = coordinator.start_window(
        &principal,
        &IncidentId(request.sos_id),
        selection,
        Utc::now(),
    )?;
    Ok(Json(incident))
}

#[derive(Debug, Deserialize)]
struct AcceptRequest {
    sos_id: String,
    estimated_completion: Option<DateTime<Utc>>,
}

async fn accept_assignment(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Json(request): Json<AcceptRequest>,
) -> Result<Json<Incident>, CoreError> {
    let incident = coordinator.accept(
        &principal,
        &IncidentId(request.sos_id),
        request.estimated_completion,
        Utc::now(),
    )?;
    Ok(Json(incident))
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    sos_id: String,
    reason: String,
}

async fn reject_assignment(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Json(request): Json<RejectRequest>,
) -> Result<Json<RejectOutcome>, CoreError> {
    let outcome = coordinator.reject(
        &principal,
        &IncidentId(request.sos_id),
        &request.reason,
        Utc::now(),
    )?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    sos_id: String,
}

async fn complete_emergency(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<Incident>, CoreError> {
    let incident =
        coordinator.complete(&principal, &IncidentId(request.sos_id), Utc::now())?;
    Ok(Json(incident))
}

#[derive(Debug, Serialize)]
struct EmergencySummary {
    total: usize,
    by_status: BTreeMap<&'static str, usize>,
    active: Vec<Incident>,
}

async fn emergency_summary(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
) -> Result<Json<EmergencySummary>, CoreError> {
    let incidents = coordinator.list(&principal, usize::MAX, 0)?;
    let mut by_status: BTreeMap<&'static str, usize> = BTreeMap::new();
    for incident in &incidents {
        *by_status.entry(incident.status.label()).or_default() += 1;
    }
    let active: Vec<Incident> = incidents
        .iter()
        .filter(|incident| incident.status.holds_capacity())
        .cloned()
        .collect();
    Ok(Json(EmergencySummary {
        total: incidents.len(),
        by_status,
        active,
    }))
}

#[derive(Debug, Serialize)]
struct ResponseStatusView {
    incident: Incident,
    window_remaining_seconds: Option<i64>,
}

async fn response_status(
    State(coordinator): State<Arc<LifecycleCoordinator>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<ResponseStatusView>, CoreError> {
    let incident = coordinator.get(&principal, &IncidentId(id))?;
    let now = Utc::now();
    let window_remaining_seconds = incident
        .assignment_deadline
        .map(|deadline| (deadline - now).num_seconds().max(0));
    Ok(Json(ResponseStatusView {
        incident,
        window_remaining_seconds,
    }))
}
