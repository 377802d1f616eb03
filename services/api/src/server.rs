use crate::cli::ServeArgs;
use crate::error::AppError;
use crate::infra::{self, AppState};
use crate::routes::{self, RouterDeps};
use axum_prometheus::PrometheusMetricLayer;
use beacon::config::AppConfig;
use beacon::identity::{AuthTokens, UserDirectory};
use beacon::store::MemoryStore;
use beacon::telemetry;
use beacon::workflows::dispatch::{CoordinatorSink, DispatchWorker, HttpTicketSink, TicketSink};
use beacon::workflows::fleet::FleetService;
use beacon::workflows::intake::verify::{OpenMeteoProvider, WeatherProvider};
use beacon::workflows::intake::MobileIntakePipeline;
use beacon::workflows::lifecycle::{LifecycleCoordinator, LifecycleSettings};
use beacon::workflows::triage::classifier::{GeminiClassifier, IncidentClassifier};
use beacon::workflows::triage::TriageService;
use beacon::workflows::workload;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

const RECONCILE_INTERVAL: Duration = Duration::from_secs(3600);

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(MemoryStore::new());
    let users = Arc::new(UserDirectory::default());
    let tokens = Arc::new(AuthTokens::default());
    infra::bootstrap_users(&config.auth, &users);

    let classifier = GeminiClassifier::from_config(&config.triage)
        .map(|classifier| Arc::new(classifier) as Arc<dyn IncidentClassifier>);
    if classifier.is_none() {
        info!("no classifier credentials configured, triage runs on rules only");
    }
    let triage = Arc::new(TriageService::new(classifier));

    let coordinator = Arc::new(LifecycleCoordinator::new(
        store.clone(),
        triage.clone(),
        LifecycleSettings::from(&config.assignment),
    ));

    let weather: Option<Arc<dyn WeatherProvider>> = Some(Arc::new(OpenMeteoProvider::new(
        config.intake.weather_timeout,
    )));
    let pipeline = Arc::new(MobileIntakePipeline::new(
        store.clone(),
        triage,
        weather,
        None,
        config.intake.clone(),
    ));

    let fleet = Arc::new(FleetService::new(store.clone(), users.clone()));

    let sink: Arc<dyn TicketSink> = match &config.dispatch.endpoint {
        Some(endpoint) => Arc::new(HttpTicketSink::new(
            endpoint.clone(),
            config.dispatch.auth_token.clone(),
            config.dispatch.deliver_timeout,
        )),
        None => Arc::new(CoordinatorSink::new(coordinator.clone())),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker_handles = Vec::new();
    for _ in 0..config.dispatch.workers {
        let worker = Arc::new(DispatchWorker::new(
            store.clone(),
            sink.clone(),
            &config.dispatch,
        ));
        worker_handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }

    spawn_sweeper(
        coordinator.clone(),
        config.assignment.sweep_interval,
        shutdown_rx.clone(),
    );
    spawn_reconciler(store.clone(), shutdown_rx.clone());

    let app = routes::build_router(RouterDeps {
        coordinator,
        pipeline,
        fleet,
        store,
        users,
        tokens,
        app_state,
    })
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, workers = config.dispatch.workers, "coordination service ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain: stop the worker pool and wait for in-flight deliveries. The
    // dispatch queue itself is durable in the store, so unfinished jobs are
    // picked up after restart.
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }
    info!("coordination service stopped");
    Ok(())
}

fn spawn_sweeper(
    coordinator: Arc<LifecycleCoordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match coordinator.sweep_expired(Utc::now()) {
                        Ok(expired) if !expired.is_empty() => {
                            info!(count = expired.len(), "auto-rejected expired assignment windows");
                        }
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "deadline sweep failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

fn spawn_reconciler(store: Arc<MemoryStore>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
        // The first tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = store.with_tx(|state| Ok(workload::reconcile(state, Utc::now())));
                    match outcome {
                        Ok(discrepancies) if !discrepancies.is_empty() => {
                            info!(count = discrepancies.len(), "workload reconciliation corrected drift");
                        }
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "workload reconciliation failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining");
}
