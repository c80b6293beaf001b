//! Signing Worker Module
//!
//! Runs a fixed number of workers, each processing one claimed job at a time.
//! Workers outlive the request or batch run that produced the job.

use super::{ClaimedJob, JobQueue};
use crate::{
    auth::TokenManager, authority::DocumentAuthority, store::DocumentStore, PipelineError, Result,
    SigningJob,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Work performed for one claimed job
///
/// Returning an error hands the job back to the queue; whether it is retried
/// depends on [`crate::PipelineError::is_retryable`].
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &SigningJob) -> Result<()>;
}

/// Submits a finished signature and mirrors the SIGNED status locally
pub struct SignatureSubmitter {
    authority: Arc<dyn DocumentAuthority>,
    store: DocumentStore,
}

impl SignatureSubmitter {
    pub fn new(authority: Arc<dyn DocumentAuthority>, store: DocumentStore) -> Self {
        Self { authority, store }
    }
}

#[async_trait]
impl JobHandler for SignatureSubmitter {
    async fn handle(&self, job: &SigningJob) -> Result<()> {
        let user_key = TokenManager::authorize(&job.company_token)?;
        self.authority
            .submit_signature(user_key, &job.external_document_id, &job.signature)
            .await?;
        if !self.store.mark_signed(&job.document_id, Utc::now()).await? {
            debug!("Document {} was already SIGNED", job.document_id);
        }
        Ok(())
    }
}

/// Bounded pool of queue workers
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
}

/// Running pool; dropping it leaves the workers running
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop claiming new jobs and wait for in-flight ones to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("Signing worker panicked: {:?}", e);
            }
        }
    }
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>, concurrency: usize) -> Self {
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
        }
    }

    /// Spawn the workers onto the current runtime
    pub fn start(self) -> WorkerHandle {
        info!("Starting {} signing workers", self.concurrency);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let workers = (0..self.concurrency)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    self.queue.clone(),
                    self.handler.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();
        WorkerHandle { shutdown, workers }
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Some(claim) = queue.claim() {
            process(worker, queue.as_ref(), &handler, claim).await;
            continue;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = queue.wait_for_work() => {}
        }
    }
    debug!("Signing worker {} stopped", worker);
}

async fn process(
    worker: usize,
    queue: &dyn JobQueue,
    handler: &Arc<dyn JobHandler>,
    claim: ClaimedJob,
) {
    debug!(
        "Worker {} processing job {} (document {}, attempt {})",
        worker, claim.id, claim.job.document_id, claim.attempt
    );

    // The handler runs in its own task so a panic settles the job instead of
    // killing the worker with the lease still held.
    let handler = handler.clone();
    let job = claim.job.clone();
    let outcome = match tokio::spawn(async move { handler.handle(&job).await }).await {
        Ok(outcome) => outcome,
        Err(e) => Err(PipelineError::HandlerAborted(e.to_string())),
    };

    let settled = match outcome {
        Ok(()) => queue.ack(&claim).map(|acked| {
            if acked {
                info!("Job {} completed: document {} signed", claim.id, claim.job.document_id);
            }
        }),
        Err(e) if e.is_retryable() => queue.retry(&claim, &e).map(|_| ()),
        Err(e) => queue.bury(&claim, &e),
    };

    if let Err(e) = settled {
        error!("Could not settle job {}: {}", claim.id, e);
    }
}
