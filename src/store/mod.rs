//! Document Store Module
//!
//! This module persists the local mirror of authority documents in SQLite,
//! together with the companies an operator acts for. It is the only shared
//! mutable resource between the synchronizer and the queue worker.

mod documents;
mod schema;

pub use documents::{DocumentStore, DocumentUpsert};
pub use schema::DocumentRow;
