//! Triage: free-form incident → `(category, priority, division type, skills)`.
//!
//! The primary path asks the external classifier; any schema violation,
//! deadline, or transport failure falls through to the deterministic rules.
//! Triage therefore never raises to its caller.

pub mod classifier;
pub mod rules;

use std::sync::Arc;

use tracing::info;

use crate::domain::{TriageResult, TriageSource};
use classifier::{ClassifierOutcome, ClassifierRequest, IncidentClassifier};

/// What the caller knows about a report before triage.
#[derive(Debug, Clone, Default)]
pub struct TriageInput {
    pub text: String,
    pub voice_transcript: Option<String>,
    pub people: u32,
    pub place: Option<String>,
    pub category_hint: Option<String>,
}

impl TriageInput {
    /// Single lowercase text blob fed to the rules path.
    fn merged_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.text.as_str()];
        if let Some(transcript) = &self.voice_transcript {
            parts.push(transcript);
        }
        if let Some(hint) = &self.category_hint {
            parts.push(hint);
        }
        if let Some(place) = &self.place {
            parts.push(place);
        }
        parts.join(" ")
    }
}

pub struct TriageService {
    classifier: Option<Arc<dyn IncidentClassifier>>,
}

impl TriageService {
    pub fn new(classifier: Option<Arc<dyn IncidentClassifier>>) -> Self {
        Self { classifier }
    }

    /// Rules-only triage, used when no classifier credentials are configured.
    pub fn rules_only() -> Self {
        Self { classifier: None }
    }

    /// Total: always yields a verdict, tagged with its source.
    pub async fn triage(&self, input: &TriageInput) -> TriageResult {
        if let Some(classifier) = &self.classifier {
            let request = ClassifierRequest {
                text: input.text.clone(),
                voice_transcript: input.voice_transcript.clone(),
                people: input.people,
                place: input.place.clone(),
                category_hint: input.category_hint.clone(),
            };
            match classifier.classify(&request).await {
                ClassifierOutcome::Classified(verdict) => {
                    return TriageResult {
                        category: verdict.category,
                        priority: verdict.priority.clamp(1, 5),
                        required_division_type: verdict.required_division_type,
                        required_skills: verdict.required_skills,
                        source: TriageSource::Llm,
                        confidence: verdict.confidence.clamp(0.0, 1.0),
                    };
                }
                ClassifierOutcome::InvalidSchema(reason) => {
                    info!(%reason, "classifier answer rejected, using rules");
                }
                ClassifierOutcome::Unavailable(reason) => {
                    info!(%reason, "classifier unavailable, using rules");
                }
            }
        }

        rules::classify(&input.merged_text(), input.people)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DivisionType;
    use async_trait::async_trait;
    use classifier::ClassifierVerdict;

    struct FixedClassifier(ClassifierOutcome);

    #[async_trait]
    impl IncidentClassifier for FixedClassifier {
        async fn classify(&self, _request: &ClassifierRequest) -> ClassifierOutcome {
            self.0.clone()
        }
    }

    fn input(text: &str, people: u32) -> TriageInput {
        TriageInput {
            text: text.to_string(),
            people,
            ..TriageInput::default()
        }
    }

    #[tokio::test]
    async fn classifier_verdict_is_tagged_llm() {
        let service = TriageService::new(Some(Arc::new(FixedClassifier(
            ClassifierOutcome::Classified(ClassifierVerdict {
                category: "Flood Rescue".to_string(),
                priority: 5,
                required_division_type: DivisionType::Rescue,
                required_skills: ["boat".to_string()].into_iter().collect(),
                confidence: 0.92,
            }),
        ))));

        let result = service.triage(&input("water rising fast", 8)).await;
        assert_eq!(result.source, TriageSource::Llm);
        assert_eq!(result.category, "Flood Rescue");
    }

    #[tokio::test]
    async fn schema_violation_falls_back_to_rules() {
        let service = TriageService::new(Some(Arc::new(FixedClassifier(
            ClassifierOutcome::InvalidSchema("prose answer".to_string()),
        ))));

        let result = service
            .triage(&input("elderly trapped in collapsed building, urgent", 1))
            .await;
        assert_eq!(result.source, TriageSource::Rules);
        assert_eq!(result.category, "Rescue");
        assert_eq!(result.priority, 5);
    }

    #[tokio::test]
    async fn missing_classifier_uses_rules() {
        let service = TriageService::rules_only();
        let result = service.triage(&input("fire and heavy smoke", 2)).await;
        assert_eq!(result.source, TriageSource::Rules);
        assert_eq!(result.category, "Fire Response");
        assert_eq!(result.priority, 5);
    }

    #[tokio::test]
    async fn transcript_and_hint_feed_the_rules_path() {
        let service = TriageService::rules_only();
        let request = TriageInput {
            text: String::new(),
            voice_transcript: Some("people trapped under debris".to_string()),
            people: 4,
            place: None,
            category_hint: None,
        };
        let result = service.triage(&request).await;
        assert_eq!(result.category, "Rescue");
    }
}
