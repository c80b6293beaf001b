//! Signature Preparation Module
//!
//! Works out exactly what the signing device must sign for a document:
//! - OUTGOING: the canonical JSON from the authority's detail record, base64
//!   encoded, signed as a fresh ("create") signature
//! - INCOMING: the authority-supplied to-sign payload, counter-signed
//!   ("append") onto the sender's attached signature

use crate::{
    auth::TokenManager, authority::DocumentAuthority, store::DocumentStore, Direction,
    PipelineError, Result, SessionToken, SignRequest, SignatureKind,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct SignaturePreparer {
    authority: Arc<dyn DocumentAuthority>,
    store: DocumentStore,
}

impl SignaturePreparer {
    pub fn new(authority: Arc<dyn DocumentAuthority>, store: DocumentStore) -> Self {
        Self { authority, store }
    }

    /// Build the sign request for local document `document_id`
    ///
    /// The detail record is always fetched fresh. Fails with
    /// `MissingSignPayload` for an incoming document the authority has not
    /// attached a to-sign payload to.
    pub async fn prepare(&self, document_id: &str, token: &SessionToken) -> Result<SignRequest> {
        let user_key = TokenManager::authorize(token)?;
        let document = self.store.get(document_id).await?;
        let details = self
            .authority
            .document_details(user_key, &document.external_id, document.direction)
            .await?;
        let data = details.get("data").unwrap_or(&Value::Null);

        let (payload, kind) = match document.direction {
            Direction::Outgoing => {
                let canonical = data.get("json").unwrap_or(&Value::Null);
                let encoded = STANDARD.encode(serde_json::to_string(canonical)?);
                (encoded, SignatureKind::Create)
            }
            Direction::Incoming => {
                let to_sign = data
                    .get("toSign")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| PipelineError::MissingSignPayload(document_id.to_string()))?;
                (to_sign.to_string(), SignatureKind::Append)
            }
        };

        debug!("Prepared {:?} payload for document {}", kind, document_id);
        Ok(SignRequest {
            document_id: document_id.to_string(),
            payload,
            kind,
        })
    }
}
