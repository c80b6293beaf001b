//! Batch Signing Module
//!
//! This module runs interactive batch signing sessions:
//! - `BatchSignGroup`: one company's certificate, documents and progress
//! - `plan`: pairs companies with certificates before a run
//! - `BatchOrchestrator`: signs every group sequentially and feeds the queue

mod group;
mod orchestrator;


pub use group::{plan, BatchSignGroup, GroupState};
pub use orchestrator::{BatchEvent, BatchOrchestrator, BatchReport};
