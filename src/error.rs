//! Pipeline Error Module
//!
//! A single error type shared by every stage of the signing pipeline.
//! Variants map onto the recovery policy: some are retried by the queue,
//! the rest are surfaced to the caller (or dead-lettered) as they are.

use crate::types::TokenScope;
use thiserror::Error;

/// Errors raised anywhere in the signing pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The authority rejected the signed proof (or the operator token) during exchange
    #[error("authority rejected credentials: {0}")]
    AuthFailed(String),

    /// Local expiry check failed; no network call was made
    #[error("session token for {0} has expired")]
    TokenExpired(TokenScope),

    /// Network failure or 5xx from the authority
    #[error("document authority unavailable: {0}")]
    RemoteUnavailable(String),

    /// Any other non-success answer from the authority
    #[error("authority returned {status}: {body}")]
    Remote { status: u16, body: String },

    /// The signing device or the authority refused a signature
    #[error("signature rejected: {0}")]
    InvalidSignature(String),

    /// An incoming document has no to-sign payload; details must be refreshed first
    #[error("document {0} has no to-sign payload")]
    MissingSignPayload(String),

    /// Natural key race during upsert
    #[error("natural key conflict for company {company_id}, document {external_id}")]
    Conflict {
        company_id: String,
        external_id: String,
    },

    #[error("document {0} not found")]
    DocumentNotFound(String),

    /// A batch was started while some company had no signing certificate selected
    #[error("no signing certificate selected for company {0}")]
    MissingCertificate(String),

    #[error("signing device error: {0}")]
    Device(String),

    #[error("job {0} not found")]
    JobNotFound(String),

    /// A job handler panicked or was cancelled mid-delivery
    #[error("job handler aborted: {0}")]
    HandlerAborted(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed remote payload: {0}")]
    Malformed(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Whether a failed queue job should be attempted again
    ///
    /// Token expiry, rejected credentials and rejected signatures will fail
    /// the same way on every replay, so they go straight to dead-letter.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::RemoteUnavailable(_) | PipelineError::Database(_) => true,
            PipelineError::Remote { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Short machine-readable name, used in job records and RPC errors
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::AuthFailed(_) => "AuthFailed",
            PipelineError::TokenExpired(_) => "TokenExpired",
            PipelineError::RemoteUnavailable(_) => "RemoteUnavailable",
            PipelineError::Remote { .. } => "Remote",
            PipelineError::InvalidSignature(_) => "InvalidSignature",
            PipelineError::MissingSignPayload(_) => "MissingSignPayload",
            PipelineError::Conflict { .. } => "Conflict",
            PipelineError::DocumentNotFound(_) => "DocumentNotFound",
            PipelineError::MissingCertificate(_) => "MissingCertificate",
            PipelineError::Device(_) => "Device",
            PipelineError::JobNotFound(_) => "JobNotFound",
            PipelineError::HandlerAborted(_) => "HandlerAborted",
            PipelineError::Configuration(_) => "Configuration",
            PipelineError::Malformed(_) => "Malformed",
            PipelineError::Database(_) => "Database",
            PipelineError::Serialization(_) => "Serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(PipelineError::RemoteUnavailable("timeout".into()).is_retryable());
        assert!(PipelineError::Remote { status: 503, body: String::new() }.is_retryable());
        assert!(PipelineError::Remote { status: 429, body: String::new() }.is_retryable());
        assert!(!PipelineError::Remote { status: 404, body: String::new() }.is_retryable());
        assert!(!PipelineError::TokenExpired(TokenScope::Company("c1".into())).is_retryable());
        assert!(!PipelineError::InvalidSignature("bad".into()).is_retryable());
    }
}
