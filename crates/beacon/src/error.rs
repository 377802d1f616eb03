use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Transport-agnostic error kinds shared by every subsystem.
///
/// The HTTP boundary maps each kind to a status code; internal dependency
/// failures are absorbed into fallbacks before they ever become one of these.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("invalid {field}: {message}")]
    InvalidInput { field: String, message: String },
    #[error("missing or invalid credentials: {0}")]
    Unauthorized(String),
    #[error("forbidden by rule '{rule}'")]
    Forbidden { rule: String },
    #[error("transition to {requested} not allowed from {current}")]
    InvalidState { current: String, requested: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("stale snapshot: {0}")]
    StaleSnapshot(String),
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn forbidden(rule: impl Into<String>) -> Self {
        Self::Forbidden { rule: rule.into() }
    }

    pub fn invalid_state(current: impl Into<String>, requested: impl Into<String>) -> Self {
        Self::InvalidState {
            current: current.into(),
            requested: requested.into(),
        }
    }

    /// Stable machine-readable name for clients and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidInput { .. } => "invalid_input",
            CoreError::Unauthorized(_) => "unauthorized",
            CoreError::Forbidden { .. } => "forbidden",
            CoreError::InvalidState { .. } => "invalid_state",
            CoreError::Conflict(_) => "conflict",
            CoreError::StaleSnapshot(_) => "stale_snapshot",
            CoreError::CapacityExceeded(_) => "capacity_exceeded",
            CoreError::NotFound(_) => "not_found",
            CoreError::DependencyUnavailable(_) => "dependency_unavailable",
            CoreError::Timeout(_) => "timeout",
            CoreError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden { .. } => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidState { .. }
            | CoreError::Conflict(_)
            | CoreError::StaleSnapshot(_)
            | CoreError::CapacityExceeded(_) => StatusCode::CONFLICT,
            CoreError::DependencyUnavailable(_) => StatusCode::BAD_GATEWAY,
            CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}
