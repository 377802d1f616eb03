//! Ticket sinks: where a drained dispatch job is delivered. The HTTP sink
//! posts to an external creation endpoint; the coordinator sink creates the
//! incident in-process. Both speak HTTP-shaped outcomes so the worker's
//! retry logic stays uniform.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::TicketPayload;
use crate::domain::DispatchJob;
use crate::error::CoreError;
use crate::identity::{Principal, Role};
use crate::workflows::lifecycle::{LifecycleCoordinator, NewIncident};

#[derive(Debug, Clone)]
pub struct SinkResponse {
    pub status: u16,
    pub ticket_id: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("delivery deadline exceeded: {0}")]
    Timeout(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait TicketSink: Send + Sync {
    async fn deliver(&self, job: &DispatchJob) -> Result<SinkResponse, SinkError>;
}

/// Posts the canonical payload to an external creation endpoint, carrying the
/// idempotency key in both header spellings the downstream understands.
pub struct HttpTicketSink {
    http: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpTicketSink {
    pub fn new(endpoint: String, auth_token: Option<String>, deliver_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(deliver_timeout)
                .build()
                .unwrap_or_default(),
            endpoint,
            auth_token,
        }
    }
}

#[async_trait]
impl TicketSink for HttpTicketSink {
    async fn deliver(&self, job: &DispatchJob) -> Result<SinkResponse, SinkError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header("Idempotency-Key", &job.idempotency_key)
            .header("X-Idempotency-Key", &job.idempotency_key)
            .json(&job.payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                SinkError::Timeout(err.to_string())
            } else {
                SinkError::Transport(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body: Option<Value> = response.json().await.ok();
        let ticket_id = body
            .as_ref()
            .and_then(|value| {
                value
                    .get("ticket_id")
                    .or_else(|| value.get("sos_id"))
                    .or_else(|| value.get("id"))
            })
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());

        Ok(SinkResponse {
            status,
            ticket_id,
            body,
        })
    }
}

/// Default sink when no external endpoint is configured: the job becomes an
/// incident through the lifecycle coordinator, under the dispatch service
/// principal. Idempotency rides on the payload's external id.
pub struct CoordinatorSink {
    coordinator: Arc<LifecycleCoordinator>,
}

impl CoordinatorSink {
    pub fn new(coordinator: Arc<LifecycleCoordinator>) -> Self {
        Self { coordinator }
    }

    fn principal() -> Principal {
        Principal {
            username: "dispatch-worker".to_string(),
            role: Role::Service,
            staff_id: None,
        }
    }
}

#[async_trait]
impl TicketSink for CoordinatorSink {
    async fn deliver(&self, job: &DispatchJob) -> Result<SinkResponse, SinkError> {
        let payload: TicketPayload = serde_json::from_value(job.payload.clone())
            .map_err(|err| SinkError::Transport(format!("malformed payload: {err}")))?;

        let draft = NewIncident {
            external_id: Some(payload.external_id.clone()),
            source: "mobile".to_string(),
            text: payload.text,
            voice_transcript: payload.voice_transcript,
            category_hint: payload.category_hint,
            place: payload.place,
            latitude: payload.latitude,
            longitude: payload.longitude,
            people_affected: payload.people,
            notes: None,
        };

        match self.coordinator.create(&Self::principal(), draft, Utc::now()).await {
            Ok(incident) => Ok(SinkResponse {
                status: 200,
                ticket_id: Some(incident.id.to_string()),
                body: None,
            }),
            Err(CoreError::InvalidInput { field, message }) => Ok(SinkResponse {
                status: 400,
                ticket_id: None,
                body: Some(serde_json::json!({"error": format!("{field}: {message}")})),
            }),
            Err(CoreError::Conflict(message)) => Ok(SinkResponse {
                status: 409,
                ticket_id: None,
                body: Some(serde_json::json!({"error": message})),
            }),
            Err(other) => Ok(SinkResponse {
                status: 500,
                ticket_id: None,
                body: Some(serde_json::json!({"error": other.to_string()})),
            }),
        }
    }
}
