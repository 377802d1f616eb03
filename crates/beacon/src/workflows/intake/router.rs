//! HTTP surface for the mobile intake pipeline and citizen follow-ups.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::normalize::{MediaPart, TicketEnvelope, TicketMetadata};
use super::{follow_up_reply, IntakeReceipt, MobileIntakePipeline};
use crate::domain::{ChatAuthor, ChatMessage, DispatchJob, Incident, JobState};
use crate::error::CoreError;
use crate::identity::Principal;
use crate::store::MemoryStore;
use crate::workflows::dispatch::queue;
use crate::workflows::lifecycle::{authorize, Action};

#[derive(Clone)]
pub struct MobileState {
    pub pipeline: Arc<MobileIntakePipeline>,
    pub store: Arc<MemoryStore>,
}

pub fn mobile_router(state: MobileState) -> Router {
    Router::new()
        .route("/mobile/tickets", post(submit_ticket))
        .route("/mobile/chat/:session/messages", post(chat_message))
        .route("/mobile/ai/voice-agent", post(voice_agent))
        .route("/mobile/incidents/:client_id", get(incident_status))
        .route("/mobile/dispatch/retry-pending", post(retry_pending))
        .with_state(state)
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

async fn submit_ticket(
    State(state): State<MobileState>,
    principal: Principal,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<IntakeReceipt>, CoreError> {
    authorize(&principal, Action::IngestTicket, None)?;

    let mut metadata: Option<TicketMetadata> = None;
    let mut images = Vec::new();
    let mut videos = Vec::new();
    let mut audio = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| CoreError::invalid_input("multipart", err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| CoreError::invalid_input(name.clone(), err.to_string()))?;

        match name.as_str() {
            "metadata" => {
                metadata = Some(serde_json::from_slice(&bytes).map_err(|err| {
                    CoreError::invalid_input("metadata", format!("not valid ticket metadata: {err}"))
                })?);
            }
            "images" | "images[]" => {
                images.push(MediaPart::from_bytes(&filename, &content_type, &bytes));
            }
            "videos" | "videos[]" => {
                videos.push(MediaPart::from_bytes(&filename, &content_type, &bytes));
            }
            "audio_file" => {
                audio = Some(MediaPart::from_bytes(&filename, &content_type, &bytes));
            }
            other => warn!(field = other, "ignoring unknown multipart field"),
        }
    }

    let metadata =
        metadata.ok_or_else(|| CoreError::invalid_input("metadata", "metadata part is required"))?;

    let envelope = TicketEnvelope {
        metadata,
        images,
        videos,
        audio,
        client_ip: client_ip(&headers),
    };

    let receipt = state.pipeline.process(envelope, Utc::now()).await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct ChatReply {
    session_id: String,
    reply: String,
}

fn append_chat_turn(
    store: &MemoryStore,
    session_id: &str,
    citizen_text: &str,
) -> Result<ChatReply, CoreError> {
    let session_id = session_id.to_string();
    let citizen_text = citizen_text.to_string();
    store.with_tx(move |state| {
        let Some(session) = state.chat_sessions.get(&session_id).cloned() else {
            return Err(CoreError::NotFound(format!("chat session {session_id}")));
        };

        let job = find_job(state, &session.client_ticket_id);
        let incident = state.incident_by_external_id(&session.client_ticket_id).cloned();
        let reply = follow_up_reply(job.as_ref(), incident.as_ref());

        let now = Utc::now();
        let session = state
            .chat_sessions
            .get_mut(&session_id)
            .expect("session fetched above");
        session.messages.push(ChatMessage {
            author: ChatAuthor::Citizen,
            text: citizen_text.clone(),
            at: now,
        });
        session.messages.push(ChatMessage {
            author: ChatAuthor::Assistant,
            text: reply.clone(),
            at: now,
        });

        Ok(ChatReply { session_id, reply })
    })
}

fn find_job(state: &crate::store::StoreState, client_ticket_id: &str) -> Option<DispatchJob> {
    state
        .jobs
        .values()
        .find(|job| job.client_ticket_id == client_ticket_id)
        .cloned()
}

async fn chat_message(
    State(state): State<MobileState>,
    principal: Principal,
    Path(session): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, CoreError> {
    authorize(&principal, Action::IngestTicket, None)?;
    Ok(Json(append_chat_turn(&state.store, &session, &request.text)?))
}

#[derive(Debug, Deserialize)]
struct VoiceAgentRequest {
    session_id: String,
    transcript: String,
}

async fn voice_agent(
    State(state): State<MobileState>,
    principal: Principal,
    Json(request): Json<VoiceAgentRequest>,
) -> Result<Json<ChatReply>, CoreError> {
    authorize(&principal, Action::IngestTicket, None)?;
    Ok(Json(append_chat_turn(
        &state.store,
        &request.session_id,
        &request.transcript,
    )?))
}

#[derive(Debug, Serialize)]
struct MobileIncidentStatus {
    client_ticket_id: String,
    job_state: Option<JobState>,
    attempts: Option<u32>,
    incident: Option<Incident>,
    message: String,
}

async fn incident_status(
    State(state): State<MobileState>,
    principal: Principal,
    Path(client_id): Path<String>,
) -> Result<Json<MobileIncidentStatus>, CoreError> {
    authorize(&principal, Action::IngestTicket, None)?;
    let view = state.store.read(|store_state| {
        let job = find_job(store_state, &client_id);
        let incident = store_state.incident_by_external_id(&client_id).cloned();
        let message = follow_up_reply(job.as_ref(), incident.as_ref());
        MobileIncidentStatus {
            client_ticket_id: client_id.clone(),
            job_state: job.as_ref().map(|job| job.state),
            attempts: job.as_ref().map(|job| job.attempts),
            incident,
            message,
        }
    });
    Ok(Json(view))
}

#[derive(Debug, Serialize)]
struct RetryPendingResponse {
    reset: usize,
}

async fn retry_pending(
    State(state): State<MobileState>,
    principal: Principal,
) -> Result<Json<RetryPendingResponse>, CoreError> {
    authorize(&principal, Action::RetryDispatch, None)?;
    let reset = state
        .store
        .with_tx(|store_state| Ok(queue::reset_failed(store_state, Utc::now())))?;
    Ok(Json(RetryPendingResponse { reset }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatSession, IncidentStatus};

    #[test]
    fn follow_up_reply_prefers_incident_state() {
        let now = Utc::now();
        let incident = Incident {
            id: crate::domain::IncidentId::from("inc-1"),
            external_id: Some("APP-1".to_string()),
            source: "mobile".to_string(),
            text: "flood".to_string(),
            voice_transcript: None,
            category: "Flood Rescue".to_string(),
            priority: 5,
            place: String::new(),
            latitude: 17.4,
            longitude: 78.5,
            people_affected: 3,
            status: IncidentStatus::InProgress,
            assigned_organization_id: None,
            assigned_division_id: None,
            assigned_staff_id: None,
            assignment_deadline: None,
            estimated_completion: None,
            actual_completion: None,
            created_by: "dispatch-worker".to_string(),
            notes: None,
            triage: None,
            created_at: now,
            updated_at: now,
        };
        let reply = follow_up_reply(None, Some(&incident));
        assert!(reply.contains("on the way"));
    }

    #[test]
    fn follow_up_reply_covers_missing_reports() {
        let reply = follow_up_reply(None, None);
        assert!(reply.contains("could not find"));
    }

    #[test]
    fn chat_turns_are_recorded_in_order() {
        let store = MemoryStore::new();
        store
            .with_tx(|state| {
                state.chat_sessions.insert(
                    "CHAT-abc".to_string(),
                    ChatSession {
                        id: "CHAT-abc".to_string(),
                        client_ticket_id: "APP-1".to_string(),
                        messages: Vec::new(),
                    },
                );
                Ok(())
            })
            .expect("seed session");

        let reply = append_chat_turn(&store, "CHAT-abc", "is anyone coming?")
            .expect("chat turn recorded");
        assert_eq!(reply.session_id, "CHAT-abc");

        store.read(|state| {
            let session = state.chat_sessions.get("CHAT-abc").expect("session");
            assert_eq!(session.messages.len(), 2);
            assert_eq!(session.messages[0].author, ChatAuthor::Citizen);
            assert_eq!(session.messages[1].author, ChatAuthor::Assistant);
        });
    }

    #[test]
    fn unknown_chat_session_is_not_found() {
        let store = MemoryStore::new();
        let err = append_chat_turn(&store, "CHAT-missing", "hello").expect_err("missing session");
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
