//! This crate implements the document signing pipeline of an accounting service.
//! It mirrors documents held by an external document authority, prepares them
//! for signing on a local signing device, runs batch signing sessions across an
//! operator's companies, and delivers finished signatures through a retrying job queue.

pub mod types; // Documents, tokens, jobs and the other shared data types.
pub mod error; // The pipeline-wide error type.
pub mod config; // Defines and loads service configuration.
pub mod authority; // Client for the external document authority.
pub mod auth; // Session token issuance and expiry checks.
pub mod store; // SQLite mirror of authority documents.
pub mod sync; // Pulls remote document lists into the store.
pub mod prepare; // Works out what to sign for a document.
pub mod signer; // Local signing device and its certificates.
pub mod queue; // Signature delivery queue and worker pool.
pub mod batch; // Sequential batch signing sessions.
pub mod api; // JSON-RPC surface for the HTTP layer.

#[cfg(test)]
mod testing;

// Re-export commonly used types and configurations for easier access.
pub use types::*;
pub use error::{PipelineError, Result};
pub use config::Config;
pub use batch::BatchOrchestrator;
