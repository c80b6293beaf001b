use crate::{queue::JobId, signer::Certificate, Company, PendingDocument, SignableCompany};
use serde::Serialize;
use std::collections::HashMap;

/// Progress of one company within a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupState {
    Idle,
    LoggingIn,
    Signing,
    Completed,
    Error,
}

/// One company's share of a batch run
///
/// Lives only for the duration of the run; nothing here is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSignGroup {
    pub company: Company,
    pub documents: Vec<PendingDocument>,
    pub certificate: Option<Certificate>,
    pub state: GroupState,
    /// Why the group ended in `Error`
    pub error: Option<String>,
    /// Jobs enqueued for this company, in document order
    pub jobs: Vec<JobId>,
    pub failed: usize,
}

impl BatchSignGroup {
    pub fn new(signable: SignableCompany, certificate: Option<Certificate>) -> Self {
        Self {
            company: signable.company,
            documents: signable.documents,
            certificate,
            state: GroupState::Idle,
            error: None,
            jobs: Vec::new(),
            failed: 0,
        }
    }

    pub fn submitted(&self) -> usize {
        self.jobs.len()
    }
}

/// Pair every company with a signing certificate
///
/// A manual selection (keyed by company id) wins; otherwise the first
/// certificate whose embedded tax-id equals the company's is used. Companies
/// left without a certificate keep `None` and block the run.
pub fn plan(
    companies: Vec<SignableCompany>,
    certificates: &[Certificate],
    selections: &HashMap<String, Certificate>,
) -> Vec<BatchSignGroup> {
    companies
        .into_iter()
        .map(|signable| {
            let certificate = selections.get(&signable.company.id).cloned().or_else(|| {
                certificates
                    .iter()
                    .find(|cert| cert.tin().as_deref() == Some(signable.company.tin.as_str()))
                    .cloned()
            });
            BatchSignGroup::new(signable, certificate)
        })
        .collect()
}
