//! Batch Orchestrator Module
//!
//! This module drives one batch signing session across all of an operator's
//! companies.
//!
//! # Run Flow
//! 1. Reject the run if any company has no certificate (before any network call)
//! 2. For each company, in order:
//!    a. Derive a company-scoped token from the operator token
//!    b. Load the company's signing key once
//!    c. For each document, in order: prepare the payload, sign it on the
//!       device, hand the signature to the queue
//! 3. Report aggregate counts; queued jobs keep running on the worker pool
//!
//! Companies are processed one at a time because the signing device services
//! a single operation at a time. A company whose login or key load fails is
//! marked `Error` and skipped; a document that fails is counted and skipped.

use super::group::{plan, BatchSignGroup, GroupState};
use crate::{
    auth::TokenManager,
    config::BatchConfig,
    prepare::SignaturePreparer,
    queue::{JobId, JobProducer},
    signer::{Certificate, KeyHandle, SigningDevice},
    PendingDocument, PipelineError, Result, SessionToken, SignableCompany, SigningJob,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Progress notifications for an interactive front end
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    GroupState {
        company_id: String,
        state: GroupState,
        error: Option<String>,
    },
    DocumentQueued {
        company_id: String,
        document_id: String,
        job_id: JobId,
    },
    DocumentFailed {
        company_id: String,
        document_id: String,
        error: String,
    },
    Finished {
        succeeded: usize,
        failed: usize,
    },
}

/// Terminal result of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub groups: Vec<BatchSignGroup>,
    /// Documents whose signature reached the queue
    pub succeeded: usize,
    /// Documents that could not be prepared, signed or queued
    pub failed: usize,
}

impl BatchReport {
    pub fn failed_groups(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| g.state == GroupState::Error)
            .count()
    }
}

/// State threaded through one run instead of living on the orchestrator
struct RunContext<'a> {
    operator: &'a SessionToken,
    events: Option<&'a UnboundedSender<BatchEvent>>,
    succeeded: usize,
    failed: usize,
}

impl RunContext<'_> {
    fn emit(&self, event: BatchEvent) {
        if let Some(events) = self.events {
            // A closed receiver only means nobody is watching.
            let _ = events.send(event);
        }
    }

    fn set_state(&self, group: &mut BatchSignGroup, state: GroupState, error: Option<String>) {
        debug!("Company {} -> {:?}", group.company.id, state);
        group.state = state;
        group.error = error.clone();
        self.emit(BatchEvent::GroupState {
            company_id: group.company.id.clone(),
            state,
            error,
        });
    }
}

/// Company-scoped credentials, obtained once per company
struct CompanySession {
    token: SessionToken,
    key: KeyHandle,
}

pub struct BatchOrchestrator {
    tokens: TokenManager,
    preparer: Arc<SignaturePreparer>,
    device: Arc<dyn SigningDevice>,
    producer: JobProducer,
    throttle: Duration,
}

impl BatchOrchestrator {
    /// Creates a new batch orchestrator
    ///
    /// # Arguments
    /// * `tokens` - Token manager used to derive company tokens
    /// * `preparer` - Builds the per-document sign payload
    /// * `device` - Signing device holding the operator's keys
    /// * `producer` - Queue hand-off for finished signatures
    /// * `config` - Batch settings (inter-document throttle)
    pub fn new(
        tokens: TokenManager,
        preparer: Arc<SignaturePreparer>,
        device: Arc<dyn SigningDevice>,
        producer: JobProducer,
        config: &BatchConfig,
    ) -> Self {
        Self {
            tokens,
            preparer,
            device,
            producer,
            throttle: Duration::from_millis(config.throttle_ms),
        }
    }

    /// Build the groups for a run from the device's certificates
    ///
    /// `selections` holds the operator's manual certificate choices by company id.
    pub async fn plan(
        &self,
        companies: Vec<SignableCompany>,
        selections: &HashMap<String, Certificate>,
    ) -> Result<Vec<BatchSignGroup>> {
        let certificates = self.device.list_certificates().await?;
        Ok(plan(companies, &certificates, selections))
    }

    /// Run a batch session over `groups`
    ///
    /// # Returns
    /// * `Ok(BatchReport)` once every company reached `Completed` or `Error`
    /// * `Err(MissingCertificate)` if a company has no certificate; nothing was started
    /// * `Err(TokenExpired)` if the operator token had already expired
    pub async fn run(
        &self,
        operator: &SessionToken,
        mut groups: Vec<BatchSignGroup>,
        events: Option<UnboundedSender<BatchEvent>>,
    ) -> Result<BatchReport> {
        if let Some(group) = groups.iter().find(|g| g.certificate.is_none()) {
            return Err(PipelineError::MissingCertificate(group.company.id.clone()));
        }
        TokenManager::authorize(operator)?;

        let total: usize = groups.iter().map(|g| g.documents.len()).sum();
        info!("Batch run starting: {} companies, {} documents", groups.len(), total);

        let mut ctx = RunContext {
            operator,
            events: events.as_ref(),
            succeeded: 0,
            failed: 0,
        };

        for group in groups.iter_mut() {
            self.run_group(&mut ctx, group).await;
        }

        info!("Batch run finished: {} queued, {} failed", ctx.succeeded, ctx.failed);
        ctx.emit(BatchEvent::Finished {
            succeeded: ctx.succeeded,
            failed: ctx.failed,
        });

        Ok(BatchReport {
            succeeded: ctx.succeeded,
            failed: ctx.failed,
            groups,
        })
    }

    async fn run_group(&self, ctx: &mut RunContext<'_>, group: &mut BatchSignGroup) {
        ctx.set_state(group, GroupState::LoggingIn, None);

        let session = match self.open_session(ctx.operator, group).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Company {} skipped: {}", group.company.id, e);
                ctx.set_state(group, GroupState::Error, Some(e.to_string()));
                return;
            }
        };

        ctx.set_state(group, GroupState::Signing, None);

        let documents = group.documents.clone();
        for (index, document) in documents.iter().enumerate() {
            if index > 0 && !self.throttle.is_zero() {
                sleep(self.throttle).await;
            }

            match self.sign_document(ctx.operator, group, &session, document).await {
                Ok(job_id) => {
                    group.jobs.push(job_id);
                    ctx.succeeded += 1;
                    ctx.emit(BatchEvent::DocumentQueued {
                        company_id: group.company.id.clone(),
                        document_id: document.id.clone(),
                        job_id,
                    });
                }
                Err(e) => {
                    warn!("Document {} of company {} failed: {}", document.id, group.company.id, e);
                    group.failed += 1;
                    ctx.failed += 1;
                    ctx.emit(BatchEvent::DocumentFailed {
                        company_id: group.company.id.clone(),
                        document_id: document.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Company {} done: {} queued, {} failed",
            group.company.id,
            group.submitted(),
            group.failed
        );
        ctx.set_state(group, GroupState::Completed, None);
    }

    async fn open_session(
        &self,
        operator: &SessionToken,
        group: &BatchSignGroup,
    ) -> Result<CompanySession> {
        let certificate = group
            .certificate
            .as_ref()
            .ok_or_else(|| PipelineError::MissingCertificate(group.company.id.clone()))?;

        let token = self
            .tokens
            .derive_company(operator, &group.company.id, &group.company.tin)
            .await?;
        let key = self.device.load_key(certificate).await?;
        Ok(CompanySession { token, key })
    }

    async fn sign_document(
        &self,
        operator: &SessionToken,
        group: &BatchSignGroup,
        session: &CompanySession,
        document: &PendingDocument,
    ) -> Result<JobId> {
        let request = self.preparer.prepare(&document.id, &session.token).await?;
        let signature = self
            .device
            .sign(&request.payload, request.kind, &session.key)
            .await?;

        Ok(self.producer.submit(SigningJob {
            document_id: document.id.clone(),
            external_document_id: document.external_id.clone(),
            signature,
            company_id: group.company.id.clone(),
            company_token: session.token.clone(),
            operator_id: operator.scope.id().to_string(),
            direction: document.direction,
        }))
    }
}
