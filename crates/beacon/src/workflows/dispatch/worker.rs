//! Worker pool draining the dispatch queue. Claims happen inside store
//! transactions; the HTTP call happens outside them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::queue::{self, BackoffPolicy};
use super::sink::{SinkError, TicketSink};
use crate::config::DispatchConfig;
use crate::domain::{DispatchJob, JobId};
use crate::error::CoreError;
use crate::store::MemoryStore;

pub struct DispatchWorker {
    store: Arc<MemoryStore>,
    sink: Arc<dyn TicketSink>,
    policy: BackoffPolicy,
    fairness_every: u64,
    poll_interval: std::time::Duration,
}

impl DispatchWorker {
    pub fn new(store: Arc<MemoryStore>, sink: Arc<dyn TicketSink>, config: &DispatchConfig) -> Self {
        Self {
            store,
            sink,
            policy: BackoffPolicy {
                initial: config.initial_backoff,
                max_backoff: config.max_backoff,
                max_attempts: config.max_attempts,
            },
            fairness_every: config.fairness_interval,
            poll_interval: config.poll_interval,
        }
    }

    /// Poll loop; exits when the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            match self.tick(Utc::now()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => return,
                    }
                }
                Err(err) => {
                    error!(error = %err, "dispatch tick failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Claim and process at most one job. Returns the processed job id.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Option<JobId>, CoreError> {
        let claimed = self
            .store
            .with_tx(|state| Ok(queue::claim_next(state, now, self.fairness_every)))?;
        let Some(job) = claimed else {
            return Ok(None);
        };
        let id = job.id.clone();
        self.process(job).await?;
        Ok(Some(id))
    }

    async fn process(&self, job: DispatchJob) -> Result<(), CoreError> {
        let outcome = self.sink.deliver(&job).await;
        let now = Utc::now();
        match outcome {
            Ok(response) if (200..300).contains(&response.status) || response.status == 409 => {
                // 409 means the downstream already holds this idempotency
                // key; the ticket exists, so the job is done.
                info!(
                    job_id = %job.id,
                    status = response.status,
                    attempts = job.attempts,
                    "dispatch delivered"
                );
                self.store.with_tx(|state| {
                    queue::record_delivery(state, &job.id, now, response.status, response.ticket_id.clone())
                })
            }
            // 408 and 429 are transient despite being 4xx; they retry with
            // backoff like server errors.
            Ok(response)
                if (400..500).contains(&response.status)
                    && response.status != 408
                    && response.status != 429 =>
            {
                warn!(job_id = %job.id, status = response.status, "dispatch rejected by downstream");
                let detail = response
                    .body
                    .as_ref()
                    .map(|body| body.to_string())
                    .unwrap_or_else(|| format!("status {}", response.status));
                self.store.with_tx(|state| {
                    queue::record_terminal_failure(state, &job.id, now, Some(response.status), &detail)
                })
            }
            Ok(response) => self.handle_retryable(&job, now, Some(response.status), "upstream error"),
            Err(SinkError::Timeout(message)) => {
                self.handle_retryable(&job, now, None, &format!("timeout: {message}"))
            }
            Err(SinkError::Transport(message)) => {
                self.handle_retryable(&job, now, None, &format!("transport: {message}"))
            }
        }
    }

    fn handle_retryable(
        &self,
        job: &DispatchJob,
        now: DateTime<Utc>,
        status: Option<u16>,
        error: &str,
    ) -> Result<(), CoreError> {
        warn!(job_id = %job.id, attempts = job.attempts, ?status, error, "dispatch attempt failed");
        self.store.with_tx(|state| {
            queue::record_retryable_failure(state, &job.id, now, status, error, &self.policy)
                .map(|_| ())
        })
    }
}
