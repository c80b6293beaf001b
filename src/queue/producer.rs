use super::{JobId, JobOptions, JobQueue};
use crate::SigningJob;
use std::sync::Arc;
use tracing::info;

/// Hands finished signatures to the queue
///
/// Submission only records the job; delivery to the authority happens later
/// on the worker pool, so this never waits on worker throughput.
#[derive(Clone)]
pub struct JobProducer {
    queue: Arc<dyn JobQueue>,
    options: JobOptions,
}

impl JobProducer {
    pub fn new(queue: Arc<dyn JobQueue>, options: JobOptions) -> Self {
        Self { queue, options }
    }

    pub fn submit(&self, job: SigningJob) -> JobId {
        let document_id = job.document_id.clone();
        let id = self.queue.enqueue(job, self.options);
        info!("Queued signature for document {} as job {}", document_id, id);
        id
    }
}
