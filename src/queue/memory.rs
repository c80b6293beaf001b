//! In-memory job queue.

use super::{
    ClaimedJob, DeliveryAttempt, JobId, JobOptions, JobQueue, JobRecord, JobState, RetryOutcome,
};
use crate::{PipelineError, Result, SigningJob};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

struct Entry {
    record: JobRecord,
    /// Earliest instant the job may be claimed again
    available_at: Instant,
    lease: Option<Uuid>,
    /// Index into `record.attempts` where the current attempt budget begins
    budget_start: usize,
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<JobId, Entry>,
    /// Queued job ids in submission order
    ready: VecDeque<JobId>,
}

/// Queue kept in process memory
///
/// All transitions happen under one mutex, which is what guarantees a job
/// is leased to at most one worker at a time. Succeeded and dead jobs stay
/// in the table so their delivery history can be inspected.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave a half-applied transition.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop completed jobs from the table
    pub fn prune_succeeded(&self) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| entry.record.state != JobState::Succeeded);
        before - state.entries.len()
    }

    /// Number of jobs waiting to be claimed (including those backing off)
    pub fn queued_len(&self) -> usize {
        self.lock().ready.len()
    }

    /// Look up the in-flight entry a claim refers to
    fn leased<'a>(state: &'a mut QueueState, claim: &ClaimedJob) -> Result<Option<&'a mut Entry>> {
        let entry = state
            .entries
            .get_mut(&claim.id)
            .ok_or_else(|| PipelineError::JobNotFound(claim.id.to_string()))?;
        if entry.record.state != JobState::InFlight || entry.lease != Some(claim.lease) {
            return Ok(None);
        }
        Ok(Some(entry))
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    fn enqueue(&self, job: SigningJob, options: JobOptions) -> JobId {
        let id = JobId::new();
        {
            let mut state = self.lock();
            state.entries.insert(
                id,
                Entry {
                    record: JobRecord {
                        id,
                        job,
                        state: JobState::Queued,
                        options,
                        attempts: Vec::new(),
                        enqueued_at: Utc::now(),
                    },
                    available_at: Instant::now(),
                    lease: None,
                    budget_start: 0,
                },
            );
            state.ready.push_back(id);
        }
        debug!("Job {} enqueued", id);
        self.notify.notify_one();
        id
    }

    fn claim(&self) -> Option<ClaimedJob> {
        let now = Instant::now();
        let mut state = self.lock();
        let position = state.ready.iter().position(|id| {
            state
                .entries
                .get(id)
                .is_some_and(|entry| entry.available_at <= now)
        })?;
        let id = state.ready.remove(position)?;
        let entry = state.entries.get_mut(&id)?;

        let lease = Uuid::new_v4();
        let attempt = (entry.record.attempts.len() - entry.budget_start) as u32 + 1;
        entry.lease = Some(lease);
        entry.record.state = JobState::InFlight;
        entry.record.attempts.push(DeliveryAttempt {
            attempt,
            started_at: Utc::now(),
            error: None,
            retry_delay: None,
        });

        Some(ClaimedJob {
            id,
            attempt,
            job: entry.record.job.clone(),
            lease,
        })
    }

    fn ack(&self, claim: &ClaimedJob) -> Result<bool> {
        let mut state = self.lock();
        let Some(entry) = Self::leased(&mut state, claim)? else {
            debug!("Ignoring stale ack for job {}", claim.id);
            return Ok(false);
        };
        entry.lease = None;
        entry.record.state = JobState::Succeeded;
        Ok(true)
    }

    fn retry(&self, claim: &ClaimedJob, error: &PipelineError) -> Result<RetryOutcome> {
        let outcome = {
            let mut state = self.lock();
            let Some(entry) = Self::leased(&mut state, claim)? else {
                return Err(PipelineError::JobNotFound(claim.id.to_string()));
            };
            entry.lease = None;

            let options = entry.record.options;
            let outcome = if claim.attempt >= options.max_attempts {
                entry.record.state = JobState::Dead;
                RetryOutcome::Dead
            } else {
                let delay = options.backoff_after(claim.attempt);
                entry.record.state = JobState::Queued;
                entry.available_at = Instant::now() + delay;
                RetryOutcome::Requeued { delay }
            };

            if let Some(last) = entry.record.attempts.last_mut() {
                last.error = Some(error.to_string());
                if let RetryOutcome::Requeued { delay } = outcome {
                    last.retry_delay = Some(delay);
                }
            }
            if matches!(outcome, RetryOutcome::Requeued { .. }) {
                state.ready.push_back(claim.id);
            }
            outcome
        };

        match outcome {
            RetryOutcome::Requeued { delay } => {
                warn!(
                    "Job {} attempt {} failed, retrying in {:?}: {}",
                    claim.id, claim.attempt, delay, error
                );
                self.notify.notify_one();
            }
            RetryOutcome::Dead => {
                error!(
                    "Job {} dead after {} attempts: {}",
                    claim.id, claim.attempt, error
                );
            }
        }
        Ok(outcome)
    }

    fn bury(&self, claim: &ClaimedJob, error: &PipelineError) -> Result<()> {
        let mut state = self.lock();
        let Some(entry) = Self::leased(&mut state, claim)? else {
            return Err(PipelineError::JobNotFound(claim.id.to_string()));
        };
        entry.lease = None;
        entry.record.state = JobState::Dead;
        if let Some(last) = entry.record.attempts.last_mut() {
            last.error = Some(error.to_string());
        }
        error!("Job {} dead-lettered without retry: {}", claim.id, error);
        Ok(())
    }

    fn job(&self, id: JobId) -> Option<JobRecord> {
        self.lock().entries.get(&id).map(|entry| entry.record.clone())
    }

    fn dead_letters(&self) -> Vec<JobRecord> {
        let state = self.lock();
        let mut dead: Vec<_> = state
            .entries
            .values()
            .filter(|entry| entry.record.state == JobState::Dead)
            .map(|entry| entry.record.clone())
            .collect();
        dead.sort_by_key(|record| record.enqueued_at);
        dead
    }

    fn resubmit(&self, id: JobId) -> Result<()> {
        {
            let mut state = self.lock();
            let entry = state
                .entries
                .get_mut(&id)
                .filter(|entry| entry.record.state == JobState::Dead)
                .ok_or_else(|| PipelineError::JobNotFound(id.to_string()))?;
            // Earlier attempts stay in the log; the budget restarts here.
            entry.budget_start = entry.record.attempts.len();
            entry.record.state = JobState::Queued;
            entry.available_at = Instant::now();
            state.ready.push_back(id);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn wait_for_work(&self) {
        let next_due = {
            let state = self.lock();
            state
                .ready
                .iter()
                .filter_map(|id| state.entries.get(id))
                .map(|entry| entry.available_at)
                .min()
        };

        match next_due {
            Some(due) if due <= Instant::now() => {}
            Some(due) => {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = sleep_until(due) => {}
                }
            }
            None => self.notify.notified().await,
        }
    }
}
