//! Outbound dispatch: a durable, lane-ordered queue drained by a small pool
//! of retrying workers.

pub mod queue;
pub mod sink;
pub mod worker;

pub use queue::{BackoffPolicy, EnqueueOutcome, RetryDecision};
pub use sink::{CoordinatorSink, HttpTicketSink, SinkError, SinkResponse, TicketSink};
pub use worker::DispatchWorker;

use serde::{Deserialize, Serialize};

/// Canonical ticket-creation payload carried by a dispatch job. Built by the
/// mobile intake pipeline and consumed by whichever sink drains the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketPayload {
    pub external_id: String,
    pub idempotency_key: String,
    pub ticket_type: String,
    #[serde(default)]
    pub text: String,
    pub voice_transcript: Option<String>,
    #[serde(default = "default_people")]
    pub people: u32,
    #[serde(default)]
    pub place: String,
    pub category_hint: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub priority: u8,
    pub lane: crate::domain::Lane,
    #[serde(default)]
    pub annotations: serde_json::Value,
    pub source: String,
}

fn default_people() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Lane;

    #[test]
    fn payload_round_trips_through_json() {
        let payload = TicketPayload {
            external_id: "APP-1".to_string(),
            idempotency_key: "APP-1".to_string(),
            ticket_type: "SOS".to_string(),
            text: "flood in the old town".to_string(),
            voice_transcript: None,
            people: 6,
            place: "Old Town".to_string(),
            category_hint: Some("Flood Rescue".to_string()),
            latitude: 17.4,
            longitude: 78.5,
            priority: 5,
            lane: Lane::P0,
            annotations: serde_json::json!({"likely_duplicate": false}),
            source: "mobile".to_string(),
        };
        let encoded = serde_json::to_value(&payload).expect("serializes");
        let decoded: TicketPayload = serde_json::from_value(encoded).expect("deserializes");
        assert_eq!(decoded, payload);
    }
}
