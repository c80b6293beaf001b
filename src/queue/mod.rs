//! Signing Queue Module
//!
//! This module implements the durable job engine that submits finished
//! signatures to the authority:
//! - `JobQueue`: enqueue / claim / ack / retry / dead-letter contract
//! - `MemoryQueue`: in-process implementation of that contract
//! - `JobProducer`: synchronous hand-off used by the batch orchestrator
//! - `WorkerPool`: bounded pool of workers draining the queue
//!
//! Job lifecycle: `queued -> in-flight -> {succeeded | queued (retry) | dead}`.
//! Delivery is at-least-once; a replayed job targets the same document with
//! the same signature.

mod memory;
mod producer;
mod worker;

pub use memory::MemoryQueue;
pub use producer::JobProducer;
pub use worker::{JobHandler, SignatureSubmitter, WorkerHandle, WorkerPool};

use crate::{config::QueueConfig, PipelineError, Result, SigningJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Queue-assigned job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| PipelineError::JobNotFound(s.to_string()))
    }
}

/// Per-job delivery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl JobOptions {
    /// Delay before the attempt following failed attempt `attempt` (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

impl From<&QueueConfig> for JobOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Queued,
    InFlight,
    Succeeded,
    Dead,
}

/// One delivery attempt as recorded by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    /// `None` when the attempt succeeded
    pub error: Option<String>,
    /// Backoff scheduled after this attempt, if it was retried
    pub retry_delay: Option<Duration>,
}

/// Queue-side view of a job
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub job: SigningJob,
    pub state: JobState,
    pub options: JobOptions,
    pub attempts: Vec<DeliveryAttempt>,
    pub enqueued_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn last_error(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|a| a.error.as_deref())
    }
}

/// A job leased to exactly one worker
///
/// The lease is what ack/retry are checked against, so a stale claim can
/// never complete a job that has since been re-claimed.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub attempt: u32,
    pub job: SigningJob,
    lease: Uuid,
}

/// What happened to a job after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Requeued { delay: Duration },
    Dead,
}

/// Contract of the job queue backing the signing worker
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist a job; never waits on worker throughput
    fn enqueue(&self, job: SigningJob, options: JobOptions) -> JobId;

    /// Lease the next due job, if any
    fn claim(&self) -> Option<ClaimedJob>;

    /// Complete a claimed job; `false` when the lease is stale (no-op)
    fn ack(&self, claim: &ClaimedJob) -> Result<bool>;

    /// Record a retryable failure, requeueing with backoff or dead-lettering
    fn retry(&self, claim: &ClaimedJob, error: &PipelineError) -> Result<RetryOutcome>;

    /// Record a terminal failure; the job is dead-lettered immediately
    fn bury(&self, claim: &ClaimedJob, error: &PipelineError) -> Result<()>;

    fn job(&self, id: JobId) -> Option<JobRecord>;

    /// Jobs that exhausted their attempts, retained for inspection
    fn dead_letters(&self) -> Vec<JobRecord>;

    /// Move a dead job back to the queue with a fresh attempt budget
    ///
    /// Attempts recorded before the resubmit stay in the job's history.
    fn resubmit(&self, id: JobId) -> Result<()>;

    /// Resolve once a job may be claimable
    async fn wait_for_work(&self);
}
