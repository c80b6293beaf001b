//! Document Authority Module
//!
//! This module handles integration with the external document-exchange authority:
//! - Lists documents per direction (paged)
//! - Timestamps signed proofs and exchanges them for session tokens
//! - Fetches per-document sign data and accepts finished signatures
//!
//! The rest of the crate talks to the authority only through [`DocumentAuthority`],
//! so tests can substitute a scripted double.

mod http;

pub use http::HttpAuthority;

use crate::{Direction, Result, SignedProof};
use async_trait::async_trait;
use serde_json::Value;

/// Remote operations offered by the document authority
///
/// Every method that takes a `user_key` requires an authorized session; callers
/// check token validity before invoking them.
#[async_trait]
pub trait DocumentAuthority: Send + Sync {
    /// One page of the company's documents in the given direction, raw
    async fn list_documents(
        &self,
        user_key: &str,
        direction: Direction,
        page: u32,
        limit: u32,
    ) -> Result<Value>;

    /// Attach a trusted timestamp to a signed proof, returning the timestamp token
    async fn add_timestamp(&self, proof: &SignedProof) -> Result<String>;

    /// Exchange a timestamped proof for a session token for `tin`
    async fn exchange_token(&self, tin: &str, timestamp_token: &str) -> Result<String>;

    /// Derive a token for a client company from an operator's session
    async fn login_company(&self, operator_key: &str, company_tin: &str) -> Result<String>;

    /// Full detail record of one document, including its sign data
    async fn document_details(
        &self,
        user_key: &str,
        external_id: &str,
        direction: Direction,
    ) -> Result<Value>;

    /// Submit a finished signature for a document
    async fn submit_signature(&self, user_key: &str, external_id: &str, signature: &str)
        -> Result<()>;
}
