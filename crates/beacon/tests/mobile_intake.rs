//! End-to-end specifications for the mobile ingestion pipeline: idempotent
//! enqueue, lane mapping, verification fallbacks, and the handoff into the
//! dispatch queue and incident lifecycle.

mod common {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use beacon::config::IntakeConfig;
    use beacon::store::MemoryStore;
    use beacon::workflows::intake::normalize::{
        ClientMetadata, DeviceInfo, TicketEnvelope, TicketMetadata, TicketType,
    };
    use beacon::workflows::intake::verify::{WeatherObservation, WeatherProvider};
    use beacon::workflows::intake::MobileIntakePipeline;
    use beacon::workflows::triage::TriageService;

    pub fn intake_config() -> IntakeConfig {
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

    pub struct FailingWeather;

    #[async_trait]
    impl WeatherProvider for FailingWeather {
        async fn current(&self, _lat: f64, _lon: f64) -> Result<WeatherObservation, String> {
            Err("weather upstream unreachable".to_string())
        }
    }

    pub struct ClearSkies;

    #[async_trait]
    impl WeatherProvider for ClearSkies {
        async fn current(&self, _lat: f64, _lon: f64) -> Result<WeatherObservation, String> {
            Ok(WeatherObservation {
                rain_mm: 3.5,
                precipitation_mm: 4.0,
                weather_code: 61,
                temperature_c: 26.0,
                wind_speed_kmh: 30.0,
            })
        }
    }

    pub fn pipeline(
        store: Arc<MemoryStore>,
        weather: Option<Arc<dyn WeatherProvider>>,
    ) -> MobileIntakePipeline {
        MobileIntakePipeline::new(
            store,
            Arc::new(TriageService::rules_only()),
            weather,
            None,
            intake_config(),
        )
    }

    pub fn sos_envelope(key: &str, text: &str, people: u32) -> TicketEnvelope {
        TicketEnvelope {
            metadata: TicketMetadata {
                schema_version: "1.0.0".to_string(),
                ticket_id_client: Some(key.to_string()),
                ticket_type: TicketType::Sos,
                text: text.to_string(),
                latitude: Some(17.9689),
                longitude: Some(79.5941),
                place: Some("Warangal Urban".to_string()),
                people: Some(people),
                device_info: DeviceInfo {
                    device_id_hash: "device-1".to_string(),
                    ..DeviceInfo::default()
                },
                metadata: ClientMetadata {
                    idempotency_key: Some(key.to_string()),
                    ..ClientMetadata::default()
                },
                ..TicketMetadata::default()
            },
            client_ip: "10.0.0.5".to_string(),
            ..TicketEnvelope::default()
        }
    }
}

use std::sync::Arc;

use beacon::domain::{JobState, Lane};
use beacon::store::MemoryStore;
use beacon::workflows::dispatch::{CoordinatorSink, DispatchWorker, TicketSink};
use beacon::workflows::lifecycle::{LifecycleCoordinator, LifecycleSettings};
use beacon::workflows::triage::TriageService;
use chrono::Utc;
use common::*;

#[tokio::test]
async fn duplicate_idempotency_keys_queue_exactly_one_job() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), None);
    let now = Utc::now();

    let first = pipeline
        .process(
            sos_envelope("APP-DEMO-001", "Flood water entered homes, children trapped", 12),
            now,
        )
        .await
        .expect("first submission queues");
    let second = pipeline
        .process(
            sos_envelope("APP-DEMO-001", "Flood water entered homes, children trapped", 12),
            now,
        )
        .await
        .expect("second submission is a no-op");

    assert!(!first.duplicate_submission);
    assert!(second.duplicate_submission);
    assert_eq!(first.job_id, second.job_id);
    assert_eq!(first.ticket_id, second.ticket_id);
    assert_eq!(store.read(|state| state.jobs.len()), 1);
}

#[tokio::test]
async fn delivered_duplicates_create_at_most_one_incident() {
    let store = Arc::new(MemoryStore::new());
    let triage = Arc::new(TriageService::rules_only());
    let coordinator = Arc::new(LifecycleCoordinator::new(
        store.clone(),
        triage,
        LifecycleSettings::new(
            std::time::Duration::from_secs(600),
            std::time::Duration::from_secs(900),
        ),
    ));
    let pipeline = pipeline(store.clone(), None);
    let sink: Arc<dyn TicketSink> = Arc::new(CoordinatorSink::new(coordinator));
    let config = beacon::config::DispatchConfig {
        endpoint: None,
        auth_token: None,
        max_attempts: 6,
        initial_backoff: std::time::Duration::from_secs(1),
        max_backoff: std::time::Duration::from_secs(300),
        workers: 1,
        fairness_interval: 8,
        poll_interval: std::time::Duration::from_millis(10),
        deliver_timeout: std::time::Duration::from_secs(15),
    };
    let worker = DispatchWorker::new(store.clone(), sink, &config);

    let now = Utc::now();
    pipeline
        .process(sos_envelope("APP-42", "flood near the bus depot", 4), now)
        .await
        .expect("queued");

    let processed = worker.tick(now).await.expect("tick runs");
    assert!(processed.is_some());
    store.read(|state| {
        assert_eq!(state.incidents.len(), 1);
        let job = state.jobs.values().next().expect("job present");
        assert_eq!(job.state, JobState::Delivered);
        assert!(job.delivered_ticket_id.is_some());
    });

    // A second delivery of the same external id is absorbed by the
    // coordinator's idempotent create.
    let reset = store
        .read(|state| state.jobs.values().next().expect("job").id.clone());
    store
        .with_tx(|state| {
            let job = state.job_mut(&reset)?;
            job.state = JobState::Queued;
            job.next_attempt_at = None;
            Ok(())
        })
        .expect("requeue for the exercise");
    worker.tick(Utc::now()).await.expect("tick runs");
    assert_eq!(store.read(|state| state.incidents.len()), 1);
}

#[tokio::test]
async fn critical_sos_rides_the_p0_lane() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store, None);
    let receipt = pipeline
        .process(
            sos_envelope("APP-p0", "Flood water entered homes, children trapped", 12),
            Utc::now(),
        )
        .await
        .expect("queued");
    let triage = receipt.triage.as_ref().expect("triage attached");
    assert_eq!(triage.priority, 5);
    assert_eq!(receipt.lane, Lane::P0);
}

#[tokio::test]
async fn duplicate_density_downgrades_one_lane() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), None);
    let now = Utc::now();

    // Three earlier incidents inside the 500 m / 30 min window.
    let triage = Arc::new(TriageService::rules_only());
    let coordinator = LifecycleCoordinator::new(
        store.clone(),
        triage,
        LifecycleSettings::new(
            std::time::Duration::from_secs(600),
            std::time::Duration::from_secs(900),
        ),
    );
    let admin = beacon::identity::Principal {
        username: "seed".to_string(),
        role: beacon::identity::Role::Admin,
        staff_id: None,
    };
    for i in 0..3 {
        coordinator
            .create(
                &admin,
                beacon::workflows::lifecycle::NewIncident {
                    external_id: None,
                    source: "intake".to_string(),
                    text: "injured person near the market".to_string(),
                    voice_transcript: None,
                    category_hint: None,
                    place: format!("stall {i}"),
                    latitude: 17.9689,
                    longitude: 79.5941,
                    people_affected: 1,
                    notes: None,
                },
                now,
            )
            .await
            .expect("seed incident");
    }

    // "injured" maps to Medical Emergency at base priority 4 => lane p1,
    // downgraded to p2 by the duplicate flag.
    let receipt = pipeline
        .process(sos_envelope("APP-dup", "injured person near the market", 1), now)
        .await
        .expect("queued");
    assert!(receipt.annotations.likely_duplicate);
    assert!(receipt.annotations.duplicate_cluster.is_some());
    assert_eq!(receipt.lane, Lane::P2);
}

#[tokio::test]
async fn weather_failure_marks_unverified_without_failing() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store, Some(Arc::new(FailingWeather)));
    let receipt = pipeline
        .process(sos_envelope("APP-wx", "flood water rising in the colony", 5), Utc::now())
        .await
        .expect("still queued");
    assert!(receipt.annotations.weather_relevant);
    assert!(receipt.annotations.weather_unverified);
    assert!(receipt.annotations.weather_confirmation.is_none());
}

#[tokio::test]
async fn live_weather_attaches_a_confirmation_score() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store, Some(Arc::new(ClearSkies)));
    let receipt = pipeline
        .process(sos_envelope("APP-wx2", "flood water rising in the colony", 5), Utc::now())
        .await
        .expect("queued");
    assert_eq!(receipt.annotations.weather_confirmation, Some(1.0));
    assert!(!receipt.annotations.weather_unverified);
}

#[tokio::test]
async fn empty_submissions_are_still_queued() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone(), None);
    let mut envelope = sos_envelope("APP-empty", "", 0);
    envelope.metadata.ticket_type =
        beacon::workflows::intake::normalize::TicketType::Normal;

    let receipt = pipeline
        .process(envelope, Utc::now())
        .await
        .expect("pipeline is total");
    assert_eq!(receipt.lane, Lane::P3);
    assert_eq!(store.read(|state| state.jobs.len()), 1);
}
