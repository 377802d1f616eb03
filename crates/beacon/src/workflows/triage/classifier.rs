//! External classifier seam. The response is modelled as a tagged outcome so
//! the fallback path can stay total: schema violations and transport failures
//! are data, not errors.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::TriageConfig;
use crate::domain::DivisionType;

/// Everything the classifier is allowed to see about a report.
#[derive(Debug, Clone)]
pub struct ClassifierRequest {
    pub text: String,
    pub voice_transcript: Option<String>,
    pub people: u32,
    pub place: Option<String>,
    pub category_hint: Option<String>,
}

/// Structured verdict required from the classifier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassifierVerdict {
    pub category: String,
    pub priority: u8,
    pub required_division_type: DivisionType,
    #[serde(default)]
    pub required_skills: BTreeSet<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone)]
pub enum ClassifierOutcome {
    Classified(ClassifierVerdict),
    /// The upstream answered but not with the required schema.
    InvalidSchema(String),
    /// Credentials missing, deadline exceeded, or transport failure.
    Unavailable(String),
}

#[async_trait]
pub trait IncidentClassifier: Send + Sync {
    async fn classify(&self, request: &ClassifierRequest) -> ClassifierOutcome;
}

/// Gemini-backed classifier with a hard request deadline.
pub struct GeminiClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClassifier {
    const DEFAULT_BASE_URL: &'static str =
        "https://generativelanguage.googleapis.com/v1beta/models";

    /// Returns `None` when no API key is configured; callers then skip the
    /// LLM path entirely.
    pub fn from_config(config: &TriageConfig) -> Option<Self> {
        let api_key = config.gemini_api_key.clone()?;
        Some(Self::new(
            api_key,
            config.gemini_model.clone(),
            config.classifier_timeout,
        ))
    }

    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    fn prompt(request: &ClassifierRequest) -> String {
        let mut prompt = String::from(
            "You are an emergency-dispatch triage assistant. Classify the report \
             below and answer with ONLY a JSON object of the form \
             {\"category\": string, \"priority\": integer 1-5, \
             \"required_division_type\": one of \"medical\"|\"rescue\"|\"logistics\"|\"communication\"|\"emergency_response\", \
             \"required_skills\": [string], \"confidence\": number 0-1}.\n\n",
        );
        prompt.push_str(&format!("Report: {}\n", request.text));
        if let Some(transcript) = &request.voice_transcript {
            prompt.push_str(&format!("Voice transcript: {transcript}\n"));
        }
        prompt.push_str(&format!("People affected: {}\n", request.people));
        if let Some(place) = &request.place {
            prompt.push_str(&format!("Place: {place}\n"));
        }
        if let Some(hint) = &request.category_hint {
            prompt.push_str(&format!("Category hint: {hint}\n"));
        }
        prompt
    }

    /// Pull the text block out of a generateContent response, tolerating
    /// markdown fences around the JSON.
    pub(crate) fn extract_verdict(body: &serde_json::Value) -> Result<ClassifierVerdict, String> {
        let text = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|value| value.as_str())
            .ok_or_else(|| "response carries no candidate text".to_string())?;

        let trimmed = text
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let verdict: ClassifierVerdict =
            serde_json::from_str(trimmed).map_err(|err| format!("candidate is not valid triage JSON: {err}"))?;

        if !(1..=5).contains(&verdict.priority) {
            return Err(format!("priority {} outside 1..=5", verdict.priority));
        }
        if verdict.category.trim().is_empty() {
            return Err("empty category".to_string());
        }
        Ok(verdict)
    }
}

#[async_trait]
impl IncidentClassifier for GeminiClassifier {
    async fn classify(&self, request: &ClassifierRequest) -> ClassifierOutcome {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = json!({
            "contents": [{
                "parts": [{"text": Self::prompt(request)}]
            }],
            "generationConfig": {"temperature": 0.1, "response_mime_type": "application/json"}
        });

        let response = match self.http.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                warn!(model = %self.model, "classifier deadline exceeded");
                return ClassifierOutcome::Unavailable("deadline exceeded".to_string());
            }
            Err(err) => {
                warn!(model = %self.model, error = %err, "classifier transport failure");
                return ClassifierOutcome::Unavailable(err.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(model = %self.model, %status, "classifier returned non-success");
            return ClassifierOutcome::Unavailable(format!("upstream status {status}"));
        }

        let payload: serde_json::Value = match response.json().await {
            Ok(payload) => payload,
            Err(err) => return ClassifierOutcome::Unavailable(err.to_string()),
        };

        match Self::extract_verdict(&payload) {
            Ok(verdict) => {
                debug!(category = %verdict.category, priority = verdict.priority, "classifier verdict");
                ClassifierOutcome::Classified(verdict)
            }
            Err(reason) => ClassifierOutcome::InvalidSchema(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate_body(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": {"parts": [{"text": text}]}
            }]
        })
    }

    #[test]
    fn extracts_a_well_formed_verdict() {
        let body = candidate_body(
            r#"{"category": "Flood Rescue", "priority": 5, "required_division_type": "rescue", "required_skills": ["boat"], "confidence": 0.9}"#,
        );
        let verdict = GeminiClassifier::extract_verdict(&body).expect("valid verdict");
        assert_eq!(verdict.category, "Flood Rescue");
        assert_eq!(verdict.priority, 5);
        assert_eq!(verdict.required_division_type, DivisionType::Rescue);
    }

    #[test]
    fn tolerates_markdown_fences() {
        let body = candidate_body(
            "```json\n{\"category\": \"Rescue\", \"priority\": 4, \"required_division_type\": \"rescue\"}\n```",
        );
        let verdict = GeminiClassifier::extract_verdict(&body).expect("fenced verdict parses");
        assert_eq!(verdict.category, "Rescue");
        assert_eq!(verdict.confidence, 0.5);
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let body = candidate_body(
            r#"{"category": "Rescue", "priority": 9, "required_division_type": "rescue"}"#,
        );
        let err = GeminiClassifier::extract_verdict(&body).expect_err("priority out of range");
        assert!(err.contains("priority"));
    }

    #[test]
    fn rejects_prose_answers() {
        let body = candidate_body("It sounds like a flood, probably priority five.");
        assert!(GeminiClassifier::extract_verdict(&body).is_err());
    }

    #[test]
    fn rejects_missing_candidates() {
        let err = GeminiClassifier::extract_verdict(&json!({})).expect_err("no candidates");
        assert!(err.contains("candidate"));
    }
}
