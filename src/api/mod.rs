//! API Module
//!
//! This module handles the JSON-RPC API the HTTP layer uses to drive the
//! signing pipeline: token exchange, document sync, sign data, signature
//! submission and dead-letter management.

mod server;
pub use server::{router, AppState, Server};
