//! Signing Device Module
//!
//! This module wraps the local signing device that holds the operator's keys:
//! - Certificates and the fields embedded in their aliases
//! - The `SigningDevice` request/response contract
//! - `DeviceBridge`, which turns the device's message transport into awaitable calls

mod bridge;
mod certificate;

pub use bridge::{DeviceBridge, DeviceCall, DeviceRequest, DEFAULT_DEVICE_TIMEOUT};
pub use certificate::{Certificate, CertificateInfo};

use crate::{Result, SignatureKind};
use async_trait::async_trait;
use std::fmt;

/// Opaque reference to a key loaded on the device
#[derive(Clone, PartialEq, Eq)]
pub struct KeyHandle(pub String);

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyHandle(..)")
    }
}

/// Operations offered by the signing device
///
/// The device services one operation at a time; callers are expected to
/// drive it sequentially.
#[async_trait]
pub trait SigningDevice: Send + Sync {
    async fn list_certificates(&self) -> Result<Vec<Certificate>>;

    /// Load the private key behind `certificate`; may prompt the operator for a password
    async fn load_key(&self, certificate: &Certificate) -> Result<KeyHandle>;

    /// Sign a base64 payload, returning the base64 PKCS#7 signature
    async fn sign(&self, payload: &str, kind: SignatureKind, key: &KeyHandle) -> Result<String>;
}
