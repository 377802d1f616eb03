//! Verification stage: weather confirmation, duplicate density, and the
//! fraud score. Each check annotates the document; none of them can fail the
//! pipeline.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::normalize::IntakeDocument;
use crate::config::IntakeConfig;
use crate::domain::IncidentId;
use crate::geo::rounded_coordinate_key;
use crate::store::StoreState;

const WEATHER_KEYWORDS: &[&str] = &[
    "flood",
    "rain",
    "storm",
    "cyclone",
    "weather",
    "landslide",
    "water logging",
    "cloudburst",
];

pub fn is_weather_related(category: &str, text: &str) -> bool {
    let merged = format!("{category} {text}").to_lowercase();
    WEATHER_KEYWORDS.iter().any(|keyword| merged.contains(keyword))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub rain_mm: f64,
    pub precipitation_mm: f64,
    pub weather_code: u16,
    pub temperature_c: f64,
    pub wind_speed_kmh: f64,
}

/// How strongly current conditions corroborate a weather-tagged report.
pub fn confirmation_score(observation: &WeatherObservation) -> f64 {
    const SEVERE_CODES: &[u16] = &[61, 63, 65, 80, 81, 82, 95, 96, 99];
    if observation.rain_mm >= 2.0
        || observation.precipitation_mm >= 3.0
        || SEVERE_CODES.contains(&observation.weather_code)
    {
        1.0
    } else if observation.rain_mm > 0.0 || observation.precipitation_mm > 0.0 {
        0.6
    } else {
        0.0
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current(&self, latitude: f64, longitude: f64) -> Result<WeatherObservation, String>;
}

/// Open-Meteo current-conditions provider with a hard deadline.
pub struct OpenMeteoProvider {
    http: reqwest::Client,
    base_url: String,
}

impl OpenMeteoProvider {
    const DEFAULT_BASE_URL: &'static str = "https://api.open-meteo.com/v1/forecast";

    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn current(&self, latitude: f64, longitude: f64) -> Result<WeatherObservation, String> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                (
                    "current",
                    "rain,precipitation,weather_code,temperature_2m,wind_speed_10m".to_string(),
                ),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("weather upstream status {}", response.status()));
        }
        let payload: serde_json::Value = response.json().await.map_err(|err| err.to_string())?;
        let current = payload.get("current").cloned().unwrap_or_default();
        let number =
            |key: &str| current.get(key).and_then(|value| value.as_f64()).unwrap_or(0.0);
        Ok(WeatherObservation {
            rain_mm: number("rain"),
            precipitation_mm: number("precipitation"),
            weather_code: number("weather_code") as u16,
            temperature_c: number("temperature_2m"),
            wind_speed_kmh: number("wind_speed_10m"),
        })
    }
}

/// Small bounded cache with TTL, keyed by rounded coordinates. Insertion
/// order doubles as the eviction order.
#[derive(Debug)]
pub struct WeatherCache {
    capacity: usize,
    ttl: chrono::Duration,
    entries: HashMap<String, (DateTime<Utc>, WeatherObservation)>,
    order: VecDeque<String>,
}

impl WeatherCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl: chrono::Duration::seconds(ttl.as_secs() as i64),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, latitude: f64, longitude: f64, now: DateTime<Utc>) -> Option<WeatherObservation> {
        let key = rounded_coordinate_key(latitude, longitude);
        match self.entries.get(&key) {
            Some((stored_at, observation)) if *stored_at + self.ttl > now => {
                Some(observation.clone())
            }
            Some(_) => {
                self.entries.remove(&key);
                self.order.retain(|entry| entry != &key);
                None
            }
            None => None,
        }
    }

    pub fn put(
        &mut self,
        latitude: f64,
        longitude: f64,
        observation: WeatherObservation,
        now: DateTime<Utc>,
    ) {
        let key = rounded_coordinate_key(latitude, longitude);
        if !self.entries.contains_key(&key) {
            if self.order.len() >= self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.entries.remove(&evicted);
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, (now, observation));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DuplicateFinding {
    pub likely_duplicate: bool,
    pub nearby_count: usize,
    /// Nearest existing incident when the density threshold trips.
    pub cluster_incident_id: Option<IncidentId>,
}

/// Count incidents inside the configured radius and window; at `threshold`
/// or more, flag the submission and attach the nearest cluster.
pub fn duplicate_density(
    state: &StoreState,
    document: &IntakeDocument,
    config: &IntakeConfig,
    now: DateTime<Utc>,
) -> DuplicateFinding {
    let window_start =
        now - chrono::Duration::seconds(config.duplicate_window.as_secs() as i64);
    let nearby = state.incidents_near(
        document.latitude,
        document.longitude,
        config.duplicate_radius_m,
        window_start,
    );
    let likely_duplicate = nearby.len() >= config.duplicate_threshold;
    DuplicateFinding {
        likely_duplicate,
        nearby_count: nearby.len(),
        cluster_incident_id: likely_duplicate
            .then(|| nearby.first().map(|(incident, _)| incident.id.clone()))
            .flatten(),
    }
}

/// Feature weights for the fraud score. The five features are fixed; their
/// weights sum to 1.0.
const WEIGHT_SHORT_TEXT: f64 = 0.15;
const WEIGHT_REPEAT_DEVICE: f64 = 0.35;
const WEIGHT_HASH_COLLISION: f64 = 0.25;
const WEIGHT_YOUNG_DEVICE: f64 = 0.15;
const WEIGHT_OFF_HOURS: f64 = 0.10;

const SHORT_TEXT_CHARS: usize = 12;
const REPEAT_DEVICE_WINDOW_MINUTES: i64 = 10;
const REPEAT_DEVICE_THRESHOLD: usize = 3;
const HASH_WINDOW_HOURS: i64 = 24;
const YOUNG_DEVICE_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FraudFinding {
    pub score: f64,
    pub requires_review: bool,
    pub short_text: bool,
    pub repeat_device: bool,
    pub media_hash_collision: bool,
    pub young_device: bool,
    pub off_hours: bool,
}

pub fn fraud_score(
    state: &StoreState,
    document: &IntakeDocument,
    config: &IntakeConfig,
    now: DateTime<Utc>,
) -> FraudFinding {
    let short_text = document.normalized_text().len() < SHORT_TEXT_CHARS && !document.has_media;

    let burst_start = now - chrono::Duration::minutes(REPEAT_DEVICE_WINDOW_MINUTES);
    let repeat_device = !document.device_id_hash.is_empty()
        && state
            .intake_traces
            .iter()
            .filter(|trace| trace.at >= burst_start)
            .filter(|trace| trace.device_id_hash == document.device_id_hash)
            .count()
            >= REPEAT_DEVICE_THRESHOLD;

    let hash_window_start = now - chrono::Duration::hours(HASH_WINDOW_HOURS);
    let media_hash_collision = !document.media_digests.is_empty()
        && state
            .intake_traces
            .iter()
            .filter(|trace| trace.at >= hash_window_start)
            .filter(|trace| trace.idempotency_key != document.idempotency_key)
            .any(|trace| {
                trace
                    .media_digests
                    .iter()
                    .any(|digest| document.media_digests.contains(digest))
            });

    let young_device = document
        .device_age_seconds
        .map(|age| age < YOUNG_DEVICE_SECONDS)
        .unwrap_or(false);

    let off_hours = document.event_timestamp.hour() < 5;

    let score = (short_text as u8 as f64) * WEIGHT_SHORT_TEXT
        + (repeat_device as u8 as f64) * WEIGHT_REPEAT_DEVICE
        + (media_hash_collision as u8 as f64) * WEIGHT_HASH_COLLISION
        + (young_device as u8 as f64) * WEIGHT_YOUNG_DEVICE
        + (off_hours as u8 as f64) * WEIGHT_OFF_HOURS;
    let score = score.min(1.0);

    FraudFinding {
        score,
        requires_review: score >= config.fraud_review_threshold,
        short_text,
        repeat_device,
        media_hash_collision,
        young_device,
        off_hours,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IntakeTrace;
    use chrono::TimeZone;

    fn observation(rain: f64, code: u16) -> WeatherObservation {
        WeatherObservation {
            rain_mm: rain,
            precipitation_mm: 0.0,
            weather_code: code,
            temperature_c: 28.0,
            wind_speed_kmh: 10.0,
        }
    }

    fn intake_config() -> IntakeConfig {
        IntakeConfig {
            duplicate_radius_m: 500.0,
            duplicate_window: Duration::from_secs(1800),
            duplicate_threshold: 3,
            fraud_review_threshold: 0.8,
            weather_cache_ttl: Duration::from_secs(600),
            weather_timeout: Duration::from_secs(3),
            stt_timeout: Duration::from_secs(10),
        }
    }

    fn document(text: &str) -> IntakeDocument {
        IntakeDocument {
            idempotency_key: "key-1".to_string(),
            ticket_id: "key-1".to_string(),
            is_sos: false,
            text: text.to_string(),
            voice_text: String::new(),
            latitude: 17.4,
            longitude: 78.5,
            location_accuracy_m: 10.0,
            event_timestamp: Utc.with_ymd_and_hms(2025, 9, 12, 13, 0, 0).single().expect("valid"),
            place: String::new(),
            people: 1,
            device_id_hash: "device-a".to_string(),
            device_age_seconds: None,
            client_ip: "10.0.0.1".to_string(),
            media_digests: Vec::new(),
            has_media: false,
            has_audio: false,
        }
    }

    #[test]
    fn weather_relevance_is_keyword_driven() {
        assert!(is_weather_related("Flood Rescue", "water everywhere"));
        assert!(is_weather_related("General Emergency", "heavy rain tonight"));
        assert!(!is_weather_related("Medical Emergency", "chest pain"));
    }

    #[test]
    fn confirmation_tiers() {
        assert_eq!(confirmation_score(&observation(3.0, 0)), 1.0);
        assert_eq!(confirmation_score(&observation(0.0, 95)), 1.0);
        assert_eq!(confirmation_score(&observation(0.5, 0)), 0.6);
        assert_eq!(confirmation_score(&observation(0.0, 0)), 0.0);
    }

    #[test]
    fn cache_expires_entries_after_ttl() {
        let mut cache = WeatherCache::new(8, Duration::from_secs(600));
        let t0 = Utc::now();
        cache.put(17.4, 78.5, observation(1.0, 0), t0);
        assert!(cache.get(17.4, 78.5, t0 + chrono::Duration::seconds(599)).is_some());
        assert!(cache.get(17.4, 78.5, t0 + chrono::Duration::seconds(601)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_is_bounded() {
        let mut cache = WeatherCache::new(2, Duration::from_secs(600));
        let now = Utc::now();
        cache.put(10.0, 10.0, observation(0.0, 0), now);
        cache.put(11.0, 11.0, observation(0.0, 0), now);
        cache.put(12.0, 12.0, observation(0.0, 0), now);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(10.0, 10.0, now).is_none());
        assert!(cache.get(12.0, 12.0, now).is_some());
    }

    #[test]
    fn nearby_coordinates_share_a_cache_entry() {
        let mut cache = WeatherCache::new(8, Duration::from_secs(600));
        let now = Utc::now();
        cache.put(17.9689, 79.5941, observation(2.5, 0), now);
        assert!(cache.get(17.9692, 79.5938, now).is_some());
    }

    #[test]
    fn fraud_score_stays_calm_for_ordinary_reports() {
        let state = StoreState::default();
        let finding = fraud_score(
            &state,
            &document("flood water entering the colony near the bridge"),
            &intake_config(),
            Utc::now(),
        );
        assert_eq!(finding.score, 0.0);
        assert!(!finding.requires_review);
    }

    #[test]
    fn burst_from_one_device_with_reused_media_requires_review() {
        let mut state = StoreState::default();
        let now = Utc::now();
        for i in 0..3 {
            state.intake_traces.push(IntakeTrace {
                at: now - chrono::Duration::minutes(2),
                idempotency_key: format!("older-{i}"),
                device_id_hash: "device-a".to_string(),
                client_ip: "10.0.0.1".to_string(),
                normalized_text: "spam".to_string(),
                media_digests: vec!["digest-x".to_string()],
                latitude: 17.4,
                longitude: 78.5,
            });
        }
        let mut doc = document("help");
        doc.media_digests = vec!["digest-x".to_string()];
        doc.has_media = true;
        doc.device_age_seconds = Some(3600);
        doc.event_timestamp = Utc.with_ymd_and_hms(2025, 9, 12, 2, 0, 0).single().expect("valid");

        let finding = fraud_score(&state, &doc, &intake_config(), now);
        assert!(finding.repeat_device);
        assert!(finding.media_hash_collision);
        assert!(finding.young_device);
        assert!(finding.off_hours);
        assert!(finding.score >= 0.8, "score {}", finding.score);
        assert!(finding.requires_review);
    }

    #[test]
    fn duplicate_density_attaches_the_nearest_cluster() {
        use crate::domain::{Incident, IncidentStatus};
        let mut state = StoreState::default();
        let now = Utc::now();
        for (id, lat) in [("inc-1", 17.4001), ("inc-2", 17.4002), ("inc-3", 17.4000)] {
            let incident = Incident {
                id: IncidentId::from(id),
                external_id: None,
                source: "mobile".to_string(),
                text: "flood".to_string(),
                voice_transcript: None,
                category: "Flood Rescue".to_string(),
                priority: 4,
                place: String::new(),
                latitude: lat,
                longitude: 78.5,
                people_affected: 2,
                status: IncidentStatus::Pending,
                assigned_organization_id: None,
                assigned_division_id: None,
                assigned_staff_id: None,
                assignment_deadline: None,
                estimated_completion: None,
                actual_completion: None,
                created_by: "mobile".to_string(),
                notes: None,
                triage: None,
                created_at: now - chrono::Duration::minutes(5),
                updated_at: now,
            };
            state.incidents.insert(incident.id.clone(), incident);
        }

        let mut doc = document("flood again");
        doc.latitude = 17.4;
        let finding = duplicate_density(&state, &doc, &intake_config(), now);
        assert!(finding.likely_duplicate);
        assert_eq!(finding.nearby_count, 3);
        assert_eq!(finding.cluster_incident_id, Some(IncidentId::from("inc-3")));
    }

    #[test]
    fn sparse_neighbourhood_is_not_a_duplicate() {
        let state = StoreState::default();
        let finding = duplicate_density(&state, &document("flood"), &intake_config(), Utc::now());
        assert!(!finding.likely_duplicate);
        assert_eq!(finding.nearby_count, 0);
    }
}
