//! Status Synchronizer Module
//!
//! This module mirrors the authority's document lists into the local store:
//! - Fetches one page per requested direction
//! - Normalizes the authority's status encodings into the canonical status
//! - Upserts each item by its natural key, skipping items that fail
//!
//! A single bad item never aborts the page or the pass.

mod normalize;
mod status;
mod synchronizer;

pub use normalize::{extract_items, normalize_item, sanitize_amount};
pub use status::map_remote_status;
pub use synchronizer::{StatusSynchronizer, SyncReport, SyncRequest};
