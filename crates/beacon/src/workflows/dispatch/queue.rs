//! Durable queue operations for outbound ticket dispatch. All functions run
//! against the store state inside a transaction, so a claim can never hand
//! the same job to two workers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::domain::{AuditKind, DispatchJob, JobId, JobState, Lane};
use crate::error::CoreError;
use crate::store::StoreState;

/// Outcome of an idempotent enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(JobId),
    /// The idempotency key was already queued; the pipeline becomes a no-op.
    Existing(JobId),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> &JobId {
        match self {
            EnqueueOutcome::Created(id) | EnqueueOutcome::Existing(id) => id,
        }
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, EnqueueOutcome::Existing(_))
    }
}

/// Insert a job unless its idempotency key is already present.
pub fn enqueue(
    state: &mut StoreState,
    now: DateTime<Utc>,
    idempotency_key: &str,
    client_ticket_id: &str,
    lane: Lane,
    payload: serde_json::Value,
    requires_review: bool,
) -> EnqueueOutcome {
    if let Some(existing) = state.jobs_by_key.get(idempotency_key) {
        return EnqueueOutcome::Existing(existing.clone());
    }

    let job = DispatchJob {
        id: JobId::next(),
        client_ticket_id: client_ticket_id.to_string(),
        idempotency_key: idempotency_key.to_string(),
        lane,
        payload,
        attempts: 0,
        next_attempt_at: None,
        state: JobState::Queued,
        last_status: None,
        last_error: None,
        delivered_ticket_id: None,
        requires_review,
        created_at: now,
        updated_at: now,
    };
    let id = job.id.clone();
    state.jobs_by_key.insert(idempotency_key.to_string(), id.clone());
    state.jobs.insert(id.clone(), job);
    EnqueueOutcome::Created(id)
}

fn eligible(job: &DispatchJob, now: DateTime<Utc>) -> bool {
    job.state == JobState::Queued
        && job
            .next_attempt_at
            .map(|instant| instant <= now)
            .unwrap_or(true)
}

fn oldest_in_lane(state: &StoreState, lane: Lane, now: DateTime<Utc>) -> Option<JobId> {
    state
        .jobs
        .values()
        .filter(|job| job.lane == lane && eligible(job, now))
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
        .map(|job| job.id.clone())
}

/// Claim the next job in strict lane order with FIFO inside a lane. Every
/// `fairness_every`-th claim serves the lowest-priority non-empty lane first
/// so p2/p3 work cannot starve behind a steady p0 stream.
pub fn claim_next(
    state: &mut StoreState,
    now: DateTime<Utc>,
    fairness_every: u64,
) -> Option<DispatchJob> {
    state.claim_counter += 1;
    let fairness_ticket = fairness_every > 0 && state.claim_counter % fairness_every == 0;

    let chosen = if fairness_ticket {
        Lane::ALL
            .iter()
            .rev()
            .find_map(|lane| oldest_in_lane(state, *lane, now))
    } else {
        Lane::ALL
            .iter()
            .find_map(|lane| oldest_in_lane(state, *lane, now))
    }?;

    let job = state.jobs.get_mut(&chosen).expect("claimed job exists");
    job.state = JobState::InFlight;
    job.attempts += 1;
    job.updated_at = now;
    Some(job.clone())
}

/// Exponential backoff policy: `base * 2^(attempt-1) * jitter(0.5..1.5)`,
/// capped by `max_backoff` and `max_attempts`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.initial.as_secs_f64() * 2f64.powi(exponent as i32);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64((base * jitter).min(self.max_backoff.as_secs_f64()))
    }

    /// Jitter-free bounds for a given attempt, used to validate schedules.
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.initial.as_secs_f64() * 2f64.powi(exponent as i32);
        let lower = (base * 0.5).min(self.max_backoff.as_secs_f64());
        let upper = (base * 1.5).min(self.max_backoff.as_secs_f64());
        (
            Duration::from_secs_f64(lower),
            Duration::from_secs_f64(upper),
        )
    }
}

pub fn record_delivery(
    state: &mut StoreState,
    job_id: &JobId,
    now: DateTime<Utc>,
    status: u16,
    ticket_id: Option<String>,
) -> Result<(), CoreError> {
    let job = state.job_mut(job_id)?;
    job.state = JobState::Delivered;
    job.last_status = Some(status);
    job.last_error = None;
    job.delivered_ticket_id = ticket_id;
    job.updated_at = now;
    Ok(())
}

pub fn record_terminal_failure(
    state: &mut StoreState,
    job_id: &JobId,
    now: DateTime<Utc>,
    status: Option<u16>,
    error: &str,
) -> Result<(), CoreError> {
    let job = state.job_mut(job_id)?;
    job.state = JobState::FailedTerminal;
    job.last_status = status;
    job.last_error = Some(error.to_string());
    job.updated_at = now;
    let detail = format!(
        "job {job_id} for ticket {} failed terminally: {error}",
        job.client_ticket_id
    );
    state.append_audit(
        now,
        "dispatch-worker",
        None,
        AuditKind::DispatchFailure,
        detail,
        None,
        None,
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Rescheduled(DateTime<Utc>),
    Exhausted,
}

/// Requeue after a retryable failure, or mark terminal once the attempt
/// budget is spent.
pub fn record_retryable_failure(
    state: &mut StoreState,
    job_id: &JobId,
    now: DateTime<Utc>,
    status: Option<u16>,
    error: &str,
    policy: &BackoffPolicy,
) -> Result<RetryDecision, CoreError> {
    let job = state.job_mut(job_id)?;
    if job.attempts >= policy.max_attempts {
        record_terminal_failure(state, job_id, now, status, error)?;
        return Ok(RetryDecision::Exhausted);
    }

    let delay = policy.delay_for(job.attempts);
    let next_attempt =
        now + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);
    job.state = JobState::Queued;
    job.last_status = status;
    job.last_error = Some(error.to_string());
    job.next_attempt_at = Some(next_attempt);
    job.updated_at = now;
    Ok(RetryDecision::Rescheduled(next_attempt))
}

/// Admin reset: terminal failures go back to the queue with a fresh attempt
/// budget.
pub fn reset_failed(state: &mut StoreState, now: DateTime<Utc>) -> usize {
    let mut reset = 0;
    for job in state.jobs.values_mut() {
        if job.state == JobState::FailedTerminal {
            job.state = JobState::Queued;
            job.attempts = 0;
            job.next_attempt_at = None;
            job.last_error = None;
            job.updated_at = now;
            reset += 1;
        }
    }
    reset
}
