use crate::infra::AppState;
use axum::extract::Extension;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon::domain::StaffId;
use beacon::error::CoreError;
use beacon::identity::{AuthTokens, Role, UserDirectory};
use beacon::store::MemoryStore;
use beacon::workflows::fleet::{router::fleet_router, FleetService};
use beacon::workflows::intake::router::{mobile_router, MobileState};
use beacon::workflows::intake::MobileIntakePipeline;
use beacon::workflows::lifecycle::router::{emergency_router, sos_router};
use beacon::workflows::lifecycle::LifecycleCoordinator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

pub(crate) struct RouterDeps {
    pub(crate) coordinator: Arc<LifecycleCoordinator>,
    pub(crate) pipeline: Arc<MobileIntakePipeline>,
    pub(crate) fleet: Arc<FleetService>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) users: Arc<UserDirectory>,
    pub(crate) tokens: Arc<AuthTokens>,
    pub(crate) app_state: AppState,
}

pub(crate) fn build_router(deps: RouterDeps) -> Router {
    Router::new()
        .merge(sos_router(deps.coordinator.clone()))
        .merge(emergency_router(deps.coordinator))
        .merge(mobile_router(MobileState {
            pipeline: deps.pipeline,
            store: deps.store,
        }))
        .merge(fleet_router(deps.fleet))
        .route("/auth/login", post(login))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(deps.tokens))
        .layer(Extension(deps.users))
        .layer(Extension(deps.app_state))
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginResponse {
    access_token: String,
    token_type: &'static str,
    role: Role,
    staff_id: Option<StaffId>,
}

pub(crate) async fn login(
    Extension(users): Extension<Arc<UserDirectory>>,
    Extension(tokens): Extension<Arc<AuthTokens>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, CoreError> {
    let principal = users
        .verify(&request.username, &request.password)
        .ok_or_else(|| CoreError::Unauthorized("invalid username or password".to_string()))?;

    let role = principal.role;
    let staff_id = principal.staff_id.clone();
    let access_token = tokens.issue(principal);
    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer",
        role,
        staff_id,
    }))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn login_issues_a_resolvable_token() {
        let users = Arc::new(UserDirectory::default());
        users.register("ops", "secret", Role::Admin, None);
        let tokens = Arc::new(AuthTokens::default());

        let Json(body) = login(
            Extension(users.clone()),
            Extension(tokens.clone()),
            Json(LoginRequest {
                username: "ops".to_string(),
                password: "secret".to_string(),
            }),
        )
        .await
        .expect("valid credentials log in");

        assert_eq!(body.token_type, "bearer");
        assert_eq!(body.role, Role::Admin);
        let principal = tokens.resolve(&body.access_token).expect("token resolves");
        assert_eq!(principal.username, "ops");
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials() {
        let users = Arc::new(UserDirectory::default());
        users.register("ops", "secret", Role::Admin, None);
        let tokens = Arc::new(AuthTokens::default());

        let err = login(
            Extension(users),
            Extension(tokens),
            Json(LoginRequest {
                username: "ops".to_string(),
                password: "wrong".to_string(),
            }),
        )
        .await
        .expect_err("bad password rejected");
        assert!(matches!(err, CoreError::Unauthorized(_)));
    }
}
