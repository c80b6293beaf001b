//! Test doubles and fixtures shared by the module tests

use crate::{
    authority::DocumentAuthority,
    queue::{JobId, JobQueue, JobRecord, JobState},
    signer::{Certificate, KeyHandle, SigningDevice},
    store::{DocumentStore, DocumentUpsert},
    Company, Direction, DocumentStatus, PendingDocument, PipelineError, Result, SessionToken,
    SignatureKind, SignedProof, SigningJob, TokenScope,
};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct AuthorityScript {
    calls: Vec<&'static str>,
    listings: HashMap<Direction, Value>,
    failing_listings: HashSet<Direction>,
    details: HashMap<String, Value>,
    reject_exchange: bool,
    rejected_logins: HashSet<String>,
    failing_submissions: HashMap<String, u32>,
    rejected_signatures: HashSet<String>,
    submitted: Vec<(String, String)>,
}

/// Scripted authority that counts every call by endpoint name
#[derive(Default)]
pub struct MockAuthority {
    script: Mutex<AuthorityScript>,
}

impl MockAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        let script = self.script.lock().unwrap();
        script.calls.iter().filter(|c| **c == endpoint).count()
    }

    pub fn total_calls(&self) -> usize {
        self.script.lock().unwrap().calls.len()
    }

    pub fn set_listing(&self, direction: Direction, body: Value) {
        self.script.lock().unwrap().listings.insert(direction, body);
    }

    pub fn fail_listing(&self, direction: Direction) {
        self.script.lock().unwrap().failing_listings.insert(direction);
    }

    pub fn set_details(&self, external_id: &str, body: Value) {
        self.script
            .lock()
            .unwrap()
            .details
            .insert(external_id.to_string(), body);
    }

    pub fn reject_exchange(&self) {
        self.script.lock().unwrap().reject_exchange = true;
    }

    pub fn reject_login(&self, company_tin: &str) {
        self.script
            .lock()
            .unwrap()
            .rejected_logins
            .insert(company_tin.to_string());
    }

    /// The next `times` submissions for `external_id` fail as unavailable
    pub fn fail_submissions(&self, external_id: &str, times: u32) {
        self.script
            .lock()
            .unwrap()
            .failing_submissions
            .insert(external_id.to_string(), times);
    }

    pub fn reject_signature(&self, external_id: &str) {
        self.script
            .lock()
            .unwrap()
            .rejected_signatures
            .insert(external_id.to_string());
    }

    /// Accepted `(external_id, signature)` pairs in submission order
    pub fn submitted(&self) -> Vec<(String, String)> {
        self.script.lock().unwrap().submitted.clone()
    }

    fn record(&self, endpoint: &'static str) -> std::sync::MutexGuard<'_, AuthorityScript> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(endpoint);
        script
    }
}

#[async_trait]
impl DocumentAuthority for MockAuthority {
    async fn list_documents(
        &self,
        _user_key: &str,
        direction: Direction,
        _page: u32,
        _limit: u32,
    ) -> Result<Value> {
        let script = self.record("list_documents");
        if script.failing_listings.contains(&direction) {
            return Err(PipelineError::RemoteUnavailable("listing down".to_string()));
        }
        Ok(script
            .listings
            .get(&direction)
            .cloned()
            .unwrap_or_else(|| json!({ "data": [] })))
    }

    async fn add_timestamp(&self, _proof: &SignedProof) -> Result<String> {
        self.record("add_timestamp");
        Ok("ts-token".to_string())
    }

    async fn exchange_token(&self, tin: &str, _timestamp_token: &str) -> Result<String> {
        let script = self.record("exchange_token");
        if script.reject_exchange {
            return Err(PipelineError::AuthFailed("proof rejected".to_string()));
        }
        Ok(format!("operator-token-{tin}"))
    }

    async fn login_company(&self, _operator_key: &str, company_tin: &str) -> Result<String> {
        let script = self.record("login_company");
        if script.rejected_logins.contains(company_tin) {
            return Err(PipelineError::AuthFailed(format!("no access to {company_tin}")));
        }
        Ok(format!("company-token-{company_tin}"))
    }

    async fn document_details(
        &self,
        _user_key: &str,
        external_id: &str,
        _direction: Direction,
    ) -> Result<Value> {
        let script = self.record("document_details");
        script
            .details
            .get(external_id)
            .cloned()
            .ok_or_else(|| PipelineError::DocumentNotFound(external_id.to_string()))
    }

    async fn submit_signature(&self, _user_key: &str, external_id: &str, signature: &str) -> Result<()> {
        let mut script = self.record("submit_signature");
        if script.rejected_signatures.contains(external_id) {
            return Err(PipelineError::InvalidSignature("bad pkcs7".to_string()));
        }
        if let Some(remaining) = script.failing_submissions.get_mut(external_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PipelineError::RemoteUnavailable("503".to_string()));
            }
        }
        script
            .submitted
            .push((external_id.to_string(), signature.to_string()));
        Ok(())
    }
}

/// Signing device double; signatures are `sig:<payload>`
pub struct MockDevice {
    certificates: Vec<Certificate>,
    locked_keys: Mutex<HashSet<String>>,
    refused_payloads: Mutex<HashSet<String>>,
    log: Mutex<Vec<String>>,
}

impl MockDevice {
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self {
            certificates,
            locked_keys: Mutex::new(HashSet::new()),
            refused_payloads: Mutex::new(HashSet::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Key loading fails for the certificate of `tin`
    pub fn lock_key(&self, tin: &str) {
        self.locked_keys.lock().unwrap().insert(tin.to_string());
    }

    pub fn refuse_payload(&self, payload: &str) {
        self.refused_payloads.lock().unwrap().insert(payload.to_string());
    }

    /// Every device operation in order, e.g. `load_key:111`, `sign:<payload>`
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl SigningDevice for MockDevice {
    async fn list_certificates(&self) -> Result<Vec<Certificate>> {
        self.log.lock().unwrap().push("list_certificates".to_string());
        Ok(self.certificates.clone())
    }

    async fn load_key(&self, certificate: &Certificate) -> Result<KeyHandle> {
        let tin = certificate.tin().unwrap_or_default();
        self.log.lock().unwrap().push(format!("load_key:{tin}"));
        if self.locked_keys.lock().unwrap().contains(&tin) {
            return Err(PipelineError::Device("wrong password".to_string()));
        }
        Ok(KeyHandle(format!("key-{tin}")))
    }

    async fn sign(&self, payload: &str, _kind: SignatureKind, _key: &KeyHandle) -> Result<String> {
        self.log.lock().unwrap().push(format!("sign:{payload}"));
        if self.refused_payloads.lock().unwrap().contains(payload) {
            return Err(PipelineError::InvalidSignature("device refused".to_string()));
        }
        Ok(format!("sig:{payload}"))
    }
}

pub fn certificate(tin: &str, name: &str) -> Certificate {
    Certificate {
        disk: "C:".to_string(),
        path: "DSKEYS".to_string(),
        name: name.to_string(),
        alias: format!("cn={name},o={name} LLC,1.2.860.3.16.1.1={tin}"),
    }
}

pub fn token(scope: TokenScope) -> SessionToken {
    SessionToken {
        value: format!("token-{scope}"),
        scope,
        expires_at: Utc::now() + Duration::hours(1),
    }
}

pub fn expired_token(scope: TokenScope) -> SessionToken {
    SessionToken {
        value: "stale".to_string(),
        scope,
        expires_at: Utc::now() - Duration::minutes(1),
    }
}

pub async fn memory_store() -> DocumentStore {
    DocumentStore::connect("sqlite::memory:").await.unwrap()
}

/// Company `company_id` linked to `operator` with `count` PENDING documents
///
/// External ids are `<company_id>-doc-<n>`, dated on consecutive days.
pub async fn seed_company(
    store: &DocumentStore,
    operator: &str,
    company_id: &str,
    tin: &str,
    count: usize,
    direction: Direction,
) -> Vec<PendingDocument> {
    store
        .upsert_company(&Company {
            id: company_id.to_string(),
            name: format!("Company {tin}"),
            tin: tin.to_string(),
        })
        .await
        .unwrap();
    store.link_operator(operator, company_id).await.unwrap();

    let mut documents = Vec::new();
    for n in 0..count {
        let upsert = DocumentUpsert {
            external_id: format!("{company_id}-doc-{n}"),
            direction,
            status: DocumentStatus::Pending,
            document_number: Some(format!("N-{n}")),
            document_date: NaiveDate::from_ymd_opt(2026, 1, 1 + n as u32),
            amount: Some(Decimal::new(10_000 * (n as i64 + 1), 2)),
            currency: "UZS".to_string(),
            counterparty_name: Some("Partner LLC".to_string()),
            counterparty_tin: Some("300000000".to_string()),
            contract_number: None,
            contract_date: None,
            payload: json!({ "doc_id": format!("{company_id}-doc-{n}") }),
        };
        let id = store.upsert(company_id, &upsert, Utc::now()).await.unwrap();
        documents.push(PendingDocument {
            id,
            external_id: upsert.external_id,
            number: upsert.document_number,
            date: upsert.document_date,
            amount: upsert.amount,
            direction,
        });
    }
    documents
}

/// Job for a document that does not exist in any store
pub fn signing_job(document_id: &str) -> SigningJob {
    SigningJob {
        document_id: document_id.to_string(),
        external_document_id: format!("ext-{document_id}"),
        signature: format!("sig-{document_id}"),
        company_id: "c1".to_string(),
        company_token: token(TokenScope::Company("c1".to_string())),
        operator_id: "op".to_string(),
        direction: Direction::Outgoing,
    }
}

pub fn signing_job_for(document: &PendingDocument, company_id: &str) -> SigningJob {
    SigningJob {
        document_id: document.id.clone(),
        external_document_id: document.external_id.clone(),
        signature: format!("sig-{}", document.external_id),
        company_id: company_id.to_string(),
        company_token: token(TokenScope::Company(company_id.to_string())),
        operator_id: "op".to_string(),
        direction: document.direction,
    }
}

/// Poll `queue` until job `id` reaches `state`; panics after five seconds
pub async fn wait_for_state(queue: &dyn JobQueue, id: JobId, state: JobState) -> JobRecord {
    let polling = async {
        loop {
            if let Some(record) = queue.job(id) {
                if record.state == state {
                    return record;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    };
    match tokio::time::timeout(std::time::Duration::from_secs(5), polling).await {
        Ok(record) => record,
        Err(_) => panic!("job {id} never reached {state:?}: {:?}", queue.job(id)),
    }
}
