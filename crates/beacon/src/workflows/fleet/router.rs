//! Admin HTTP surface for fleet management.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use super::{
    DivisionDraft, FleetService, OrganizationDraft, OrganizationPatch, StaffDraft,
};
use crate::domain::{Division, DivisionId, Organization, OrganizationId, Staff, StaffId};
use crate::error::CoreError;
use crate::identity::Principal;

pub fn fleet_router(service: Arc<FleetService>) -> Router {
    Router::new()
        .route(
            "/organizations",
            get(list_organizations).post(create_organization),
        )
        .route(
            "/organizations/:id",
            delete(delete_organization).put(update_organization),
        )
        .route("/divisions", get(list_divisions).post(create_division))
        .route("/divisions/:id", delete(delete_division))
        .route("/staff", get(list_staff).post(create_staff))
        .route("/staff/:id", delete(delete_staff))
        .with_state(service)
}

async fn list_organizations(
    State(service): State<Arc<FleetService>>,
    principal: Principal,
) -> Result<Json<Vec<Organization>>, CoreError> {
    Ok(Json(service.list_organizations(&principal)?))
}

async fn create_organization(
    State(service): State<Arc<FleetService>>,
    principal: Principal,
    Json(draft): Json<OrganizationDraft>,
) -> Result<Json<Organization>, CoreError> {
    Ok(Json(service.create_organization(&principal, draft, Utc::now())?))
}

async fn update_organization(
    State(service): State<Arc<FleetService>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(patch): Json<OrganizationPatch>,
) -> Result<Json<Organization>, CoreError> {
    Ok(Json(service.update_organization(
        &principal,
        &OrganizationId(id),
        patch,
        Utc::now(),
    )?))
}

async fn delete_organization(
    State(service): State<Arc<FleetService>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    service.delete_organization(&principal, &OrganizationId(id))?;
    Ok(Json(json!({"deleted": true})))
}

async fn list_divisions(
    State(service): State<Arc<FleetService>>,
    principal: Principal,
) -> Result<Json<Vec<Division>>, CoreError> {
    Ok(Json(service.list_divisions(&principal)?))
}

async fn create_division(
    State(service): State<Arc<FleetService>>,
    principal: Principal,
    Json(draft): Json<DivisionDraft>,
) -> Result<Json<Division>, CoreError> {
    Ok(Json(service.create_division(&principal, draft, Utc::now())?))
}

async fn delete_division(
    State(service): State<Arc<FleetService>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    service.delete_division(&principal, &DivisionId(id))?;
    Ok(Json(json!({"deleted": true})))
}

async fn list_staff(
    State(service): State<Arc<FleetService>>,
    principal: Principal,
) -> Result<Json<Vec<Staff>>, CoreError> {
    Ok(Json(service.list_staff(&principal)?))
}

async fn create_staff(
    State(service): State<Arc<FleetService>>,
    principal: Principal,
    Json(draft): Json<StaffDraft>,
) -> Result<Json<Staff>, CoreError> {
    Ok(Json(service.create_staff(&principal, draft, Utc::now())?))
}

async fn delete_staff(
    State(service): State<Arc<FleetService>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    service.delete_staff(&principal, &StaffId(id))?;
    Ok(Json(json!({"deleted": true})))
}
