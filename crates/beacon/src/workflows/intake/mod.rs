//! Mobile ingestion pipeline: normalise multi-modal input, verify claims,
//! compute the priority lane, and enqueue an idempotent dispatch job.
//!
//! The pipeline is total: verification providers that fail annotate the
//! document instead of failing it, and a submission always ends as exactly
//! one queued job per idempotency key.

pub mod lanes;
pub mod normalize;
pub mod router;
pub mod verify;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::IntakeConfig;
use crate::domain::{ChatSession, DispatchJob, Incident, IncidentId, JobId, Lane, TriageResult};
use crate::error::CoreError;
use crate::store::MemoryStore;
use crate::workflows::dispatch::{queue, TicketPayload};
use crate::workflows::triage::{TriageInput, TriageService};
use normalize::{chat_session_id, IntakeDocument, MediaPart, TicketEnvelope};
use verify::{
    confirmation_score, duplicate_density, fraud_score, is_weather_related, WeatherCache,
    WeatherProvider,
};

/// Pluggable speech-to-text provider; failure yields empty text plus a flag.
#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    async fn transcribe(&self, audio: &MediaPart) -> Result<String, String>;
}

/// Everything the verification stage learned about a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerificationAnnotations {
    pub weather_relevant: bool,
    pub weather_unverified: bool,
    pub weather_confirmation: Option<f64>,
    pub likely_duplicate: bool,
    pub duplicate_cluster: Option<IncidentId>,
    pub nearby_count: usize,
    pub fraud_score: f64,
    pub requires_review: bool,
    pub stt_unavailable: bool,
}

/// What the citizen gets back from an intake call.
#[derive(Debug, Clone, Serialize)]
pub struct IntakeReceipt {
    pub job_id: JobId,
    pub ticket_id: String,
    pub chat_session_id: String,
    pub lane: Lane,
    /// True when the idempotency key had already been queued.
    pub duplicate_submission: bool,
    pub triage: Option<TriageResult>,
    pub annotations: VerificationAnnotations,
}

pub struct MobileIntakePipeline {
    store: Arc<MemoryStore>,
    triage: Arc<TriageService>,
    weather: Option<Arc<dyn WeatherProvider>>,
    transcriber: Option<Arc<dyn SpeechTranscriber>>,
    weather_cache: Mutex<WeatherCache>,
    config: IntakeConfig,
}

impl MobileIntakePipeline {
    pub fn new(
        store: Arc<MemoryStore>,
        triage: Arc<TriageService>,
        weather: Option<Arc<dyn WeatherProvider>>,
        transcriber: Option<Arc<dyn SpeechTranscriber>>,
        config: IntakeConfig,
    ) -> Self {
        let weather_cache = Mutex::new(WeatherCache::new(256, config.weather_cache_ttl));
        Self {
            store,
            triage,
            weather,
            transcriber,
            weather_cache,
            config,
        }
    }

    /// Run the full pipeline for one submission. External failures are
    /// absorbed into annotations; the job is queued regardless.
    pub async fn process(
        &self,
        envelope: TicketEnvelope,
        now: DateTime<Utc>,
    ) -> Result<IntakeReceipt, CoreError> {
        let mut document = normalize::normalize(&envelope, now);
        let mut annotations = VerificationAnnotations::default();

        // Fast idempotency path: the key has been seen before.
        if let Some(existing) = self.store.read(|state| {
            state
                .jobs_by_key
                .get(&document.idempotency_key)
                .and_then(|id| state.jobs.get(id))
                .cloned()
        }) {
            info!(key = %document.idempotency_key, "duplicate intake, returning existing job");
            return Ok(self.existing_receipt(&document, existing));
        }

        // Modality analysis: substitute the transcript for missing text, and
        // request STT when only audio is present.
        if document.text.is_empty() && document.voice_text.is_empty() {
            if let (Some(transcriber), Some(audio)) = (&self.transcriber, &envelope.audio) {
                match transcriber.transcribe(audio).await {
                    Ok(text) => document.voice_text = text,
                    Err(reason) => {
                        warn!(%reason, "speech transcription unavailable");
                        annotations.stt_unavailable = true;
                    }
                }
            } else if envelope.audio.is_some() {
                annotations.stt_unavailable = true;
            }
        }

        let triage = self
            .triage
            .triage(&TriageInput {
                text: if document.text.is_empty() {
                    document.voice_text.clone()
                } else {
                    document.text.clone()
                },
                voice_transcript: Some(document.voice_text.clone()).filter(|t| !t.is_empty()),
                people: document.people,
                place: Some(document.place.clone()).filter(|p| !p.is_empty()),
                category_hint: None,
            })
            .await;

        self.verify_weather(&document, &triage, now, &mut annotations).await;

        let (duplicate, fraud) = self.store.read(|state| {
            (
                duplicate_density(state, &document, &self.config, now),
                fraud_score(state, &document, &self.config, now),
            )
        });
        annotations.likely_duplicate = duplicate.likely_duplicate;
        annotations.duplicate_cluster = duplicate.cluster_incident_id.clone();
        annotations.nearby_count = duplicate.nearby_count;
        annotations.fraud_score = fraud.score;
        annotations.requires_review = fraud.requires_review;

        let lane = lanes::lane_for(
            triage.priority,
            annotations.requires_review,
            annotations.likely_duplicate,
        );

        let payload = TicketPayload {
            external_id: document.ticket_id.clone(),
            idempotency_key: document.idempotency_key.clone(),
            ticket_type: if document.is_sos { "SOS" } else { "Normal" }.to_string(),
            text: document.text.clone(),
            voice_transcript: Some(document.voice_text.clone()).filter(|t| !t.is_empty()),
            people: document.people,
            place: document.place.clone(),
            category_hint: Some(triage.category.clone()),
            latitude: document.latitude,
            longitude: document.longitude,
            priority: triage.priority,
            lane,
            annotations: serde_json::to_value(&annotations).unwrap_or_else(|_| json!({})),
            source: "mobile".to_string(),
        };

        let session_id = chat_session_id(&document.idempotency_key);
        let requires_review = annotations.requires_review;
        let outcome = self.store.with_tx(|state| {
            state.intake_traces.push(crate::domain::IntakeTrace {
                at: now,
                idempotency_key: document.idempotency_key.clone(),
                device_id_hash: document.device_id_hash.clone(),
                client_ip: document.client_ip.clone(),
                normalized_text: document.normalized_text(),
                media_digests: document.media_digests.clone(),
                latitude: document.latitude,
                longitude: document.longitude,
            });
            state
                .chat_sessions
                .entry(session_id.clone())
                .or_insert_with(|| ChatSession {
                    id: session_id.clone(),
                    client_ticket_id: document.ticket_id.clone(),
                    messages: Vec::new(),
                });
            Ok(queue::enqueue(
                state,
                now,
                &document.idempotency_key,
                &document.ticket_id,
                lane,
                serde_json::to_value(&payload).unwrap_or_else(|_| json!({})),
                requires_review,
            ))
        })?;

        info!(
            key = %document.idempotency_key,
            lane = lane.label(),
            priority = triage.priority,
            duplicate = annotations.likely_duplicate,
            review = annotations.requires_review,
            "mobile ticket queued"
        );

        Ok(IntakeReceipt {
            job_id: outcome.job_id().clone(),
            ticket_id: document.ticket_id,
            chat_session_id: session_id,
            lane,
            duplicate_submission: outcome.is_existing(),
            triage: Some(triage),
            annotations,
        })
    }

    fn existing_receipt(&self, document: &IntakeDocument, job: DispatchJob) -> IntakeReceipt {
        IntakeReceipt {
            job_id: job.id,
            ticket_id: job.client_ticket_id,
            chat_session_id: chat_session_id(&document.idempotency_key),
            lane: job.lane,
            duplicate_submission: true,
            triage: None,
            annotations: VerificationAnnotations::default(),
        }
    }

    async fn verify_weather(
        &self,
        document: &IntakeDocument,
        triage: &TriageResult,
        now: DateTime<Utc>,
        annotations: &mut VerificationAnnotations,
    ) {
        if !is_weather_related(&triage.category, &document.normalized_text()) {
            return;
        }
        annotations.weather_relevant = true;

        let cached = self
            .weather_cache
            .lock()
            .expect("weather cache mutex poisoned")
            .get(document.latitude, document.longitude, now);
        if let Some(observation) = cached {
            annotations.weather_confirmation = Some(confirmation_score(&observation));
            return;
        }

        let Some(provider) = &self.weather else {
            annotations.weather_unverified = true;
            return;
        };
        match provider.current(document.latitude, document.longitude).await {
            Ok(observation) => {
                annotations.weather_confirmation = Some(confirmation_score(&observation));
                self.weather_cache
                    .lock()
                    .expect("weather cache mutex poisoned")
                    .put(document.latitude, document.longitude, observation, now);
            }
            Err(reason) => {
                warn!(%reason, "weather verification unavailable");
                annotations.weather_unverified = true;
            }
        }
    }
}

/// Status reply for citizen follow-ups, derived from the dispatch job and
/// any downstream incident.
pub fn follow_up_reply(job: Option<&DispatchJob>, incident: Option<&Incident>) -> String {
    use crate::domain::{IncidentStatus, JobState};

    if let Some(incident) = incident {
        return match incident.status {
            IncidentStatus::Pending => {
                "Your report has been registered and is being triaged. Stay in a safe place."
                    .to_string()
            }
            IncidentStatus::PendingAssignment => {
                "A response team is being assigned to your report right now.".to_string()
            }
            IncidentStatus::InProgress => {
                "A response team has accepted your report and is on the way.".to_string()
            }
            IncidentStatus::Done => "The response to your report has been completed.".to_string(),
            IncidentStatus::Cancelled => {
                "Your report was closed by the operations team. Submit a new report if you still need help."
                    .to_string()
            }
        };
    }

    match job.map(|job| job.state) {
        Some(JobState::Queued) | Some(JobState::InFlight) => {
            "Your report is queued for dispatch. Keep your phone reachable.".to_string()
        }
        Some(JobState::Delivered) => {
            "Your report has reached the control room and is being processed.".to_string()
        }
        Some(JobState::FailedTerminal) => {
            "We are having trouble forwarding your report; the operations team has been alerted."
                .to_string()
        }
        None => "We could not find that report. Please resubmit if you still need help.".to_string(),
    }
}
