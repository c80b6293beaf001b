//! Session Token Module
//!
//! This module issues and holds the short-lived session tokens the authority
//! requires. Tokens are refreshed only on demand: an expired token is reported
//! as `TokenExpired` and never used for a remote call.

mod manager;
pub use manager::TokenManager;
