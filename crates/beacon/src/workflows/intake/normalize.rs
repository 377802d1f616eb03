//! Canonical intake document: collapse the multi-modal metadata envelope
//! (schema 1.0.0) into the shape the rest of the pipeline works on. Nothing
//! here mutates the original inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::sha256_hex;

pub const METADATA_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TicketType {
    #[serde(rename = "SOS")]
    Sos,
    #[default]
    #[serde(rename = "Normal")]
    Normal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceTranscript {
    #[serde(default)]
    pub raw_text: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptSegment {
    #[serde(default)]
    pub start_ms: u64,
    #[serde(default)]
    pub end_ms: u64,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaRef {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub device_id_hash: String,
    pub platform: Option<String>,
    pub os_version: Option<String>,
    pub app_version: Option<String>,
    pub device_age_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub idempotency_key: Option<String>,
    pub capture_mode: Option<String>,
    pub connectivity_state: Option<String>,
}

/// The `metadata` part of a mobile ticket submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketMetadata {
    #[serde(default)]
    pub schema_version: String,
    pub ticket_id_client: Option<String>,
    #[serde(default)]
    pub ticket_type: TicketType,
    #[serde(default)]
    pub text: String,
    pub voice_transcript: Option<VoiceTranscript>,
    #[serde(default)]
    pub image: Vec<MediaRef>,
    #[serde(default)]
    pub video: Vec<MediaRef>,
    pub audio_file_ref: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_accuracy_m: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub place: Option<String>,
    pub people: Option<u32>,
    #[serde(default)]
    pub device_info: DeviceInfo,
    #[serde(default)]
    pub metadata: ClientMetadata,
}

/// One uploaded media part, reduced to what verification needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPart {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Content digest standing in for a perceptual hash in collision checks.
    pub digest: String,
}

impl MediaPart {
    pub fn from_bytes(filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as u64,
            digest: sha256_hex(bytes),
        }
    }
}

/// A full mobile submission as received by the intake endpoint.
#[derive(Debug, Clone, Default)]
pub struct TicketEnvelope {
    pub metadata: TicketMetadata,
    pub images: Vec<MediaPart>,
    pub videos: Vec<MediaPart>,
    pub audio: Option<MediaPart>,
    pub client_ip: String,
}

/// Canonical document the verification and lane stages annotate.
#[derive(Debug, Clone)]
pub struct IntakeDocument {
    pub idempotency_key: String,
    pub ticket_id: String,
    pub is_sos: bool,
    pub text: String,
    pub voice_text: String,
    pub latitude: f64,
    pub longitude: f64,
    pub location_accuracy_m: f64,
    pub event_timestamp: DateTime<Utc>,
    pub place: String,
    pub people: u32,
    pub device_id_hash: String,
    pub device_age_seconds: Option<u64>,
    pub client_ip: String,
    pub media_digests: Vec<String>,
    pub has_media: bool,
    pub has_audio: bool,
}

impl IntakeDocument {
    pub fn normalized_text(&self) -> String {
        format!("{} {}", self.text, self.voice_text)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// Deterministic chat-session id for a submission.
pub fn chat_session_id(idempotency_key: &str) -> String {
    let digest = sha256_hex(idempotency_key.as_bytes());
    format!("CHAT-{}", &digest[..12])
}

/// Collapse an envelope into the canonical document, assigning an
/// idempotency key when the client did not supply one.
pub fn normalize(envelope: &TicketEnvelope, now: DateTime<Utc>) -> IntakeDocument {
    let metadata = &envelope.metadata;

    let ticket_id = metadata
        .ticket_id_client
        .clone()
        .filter(|value| !value.trim().is_empty());
    let idempotency_key = metadata
        .metadata
        .idempotency_key
        .clone()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| ticket_id.clone())
        .unwrap_or_else(|| format!("idem-{}", Uuid::new_v4().simple()));
    let ticket_id = ticket_id.unwrap_or_else(|| idempotency_key.clone());

    let voice_text = metadata
        .voice_transcript
        .as_ref()
        .map(|transcript| transcript.raw_text.trim().to_string())
        .unwrap_or_default();

    let mut media_digests: Vec<String> = envelope
        .images
        .iter()
        .chain(envelope.videos.iter())
        .map(|part| part.digest.clone())
        .collect();
    if let Some(audio) = &envelope.audio {
        media_digests.push(audio.digest.clone());
    }

    IntakeDocument {
        idempotency_key,
        ticket_id,
        is_sos: metadata.ticket_type == TicketType::Sos,
        text: metadata.text.trim().to_string(),
        voice_text,
        latitude: metadata.latitude.unwrap_or(0.0),
        longitude: metadata.longitude.unwrap_or(0.0),
        location_accuracy_m: metadata.location_accuracy_m.unwrap_or(0.0),
        event_timestamp: metadata.timestamp.unwrap_or(now),
        place: metadata.place.clone().unwrap_or_default(),
        people: metadata.people.unwrap_or(1).max(1),
        device_id_hash: metadata.device_info.device_id_hash.clone(),
        device_age_seconds: metadata.device_info.device_age_seconds,
        client_ip: envelope.client_ip.clone(),
        has_media: !envelope.images.is_empty()
            || !envelope.videos.is_empty()
            || envelope.audio.is_some(),
        has_audio: envelope.audio.is_some(),
        media_digests,
    }
}
