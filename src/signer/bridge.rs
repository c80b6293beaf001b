//! Request/response bridge over the device's message transport.
//!
//! The device speaks a socket protocol of `{plugin, name, arguments}` messages
//! answered by JSON objects. The transport pump (websocket, native messaging,
//! test double) owns the receiving end of the channel and answers each call
//! through its `reply` sender.

use super::{Certificate, KeyHandle, SigningDevice};
use crate::{PipelineError, Result, SignatureKind};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// Message sent to the device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRequest {
    pub plugin: &'static str,
    pub name: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
}

/// A request in flight, answered exactly once by the transport
#[derive(Debug)]
pub struct DeviceCall {
    pub request: DeviceRequest,
    pub reply: oneshot::Sender<Value>,
}

/// [`SigningDevice`] backed by a message channel
pub struct DeviceBridge {
    outbox: mpsc::Sender<DeviceCall>,
    // One outstanding request at a time; the device cannot match replies otherwise.
    in_use: Mutex<()>,
    timeout: Duration,
}

impl DeviceBridge {
    pub fn new(outbox: mpsc::Sender<DeviceCall>, timeout: Duration) -> Self {
        Self {
            outbox,
            in_use: Mutex::new(()),
            timeout,
        }
    }

    /// Bridge plus the receiving end the transport pump must drain
    pub fn channel(timeout: Duration) -> (Self, mpsc::Receiver<DeviceCall>) {
        let (outbox, inbox) = mpsc::channel(16);
        (Self::new(outbox, timeout), inbox)
    }

    /// Send one request and wait for the device's reply
    ///
    /// Errors here are transport faults. A reply reporting `success: false`
    /// is returned as `Ok(Err(reason))` so each operation can classify it.
    async fn call(&self, request: DeviceRequest) -> Result<std::result::Result<Value, String>> {
        let _turn = self.in_use.lock().await;
        debug!("Device call {}/{}", request.plugin, request.name);

        let (reply, response) = oneshot::channel();
        self.outbox
            .send(DeviceCall { request, reply })
            .await
            .map_err(|_| PipelineError::Device("signing device disconnected".to_string()))?;

        let response = tokio::time::timeout(self.timeout, response)
            .await
            .map_err(|_| PipelineError::Device("signing device did not answer in time".to_string()))?
            .map_err(|_| PipelineError::Device("signing device dropped the request".to_string()))?;

        if response.get("success").and_then(Value::as_bool) == Some(false) {
            return Ok(Err(failure_reason(&response)));
        }
        Ok(Ok(response))
    }
}

fn failure_reason(response: &Value) -> String {
    ["reason", "error"]
        .iter()
        .find_map(|key| response.get(*key).and_then(Value::as_str))
        .unwrap_or("signing device reported failure")
        .to_string()
}

fn required_str(response: &Value, field: &str) -> Result<String> {
    response
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PipelineError::Device(format!("device response missing {field}")))
}

#[async_trait]
impl SigningDevice for DeviceBridge {
    async fn list_certificates(&self) -> Result<Vec<Certificate>> {
        let response = self
            .call(DeviceRequest {
                plugin: "pfx",
                name: "list_all_certificates",
                arguments: Vec::new(),
            })
            .await?
            .map_err(PipelineError::Device)?;
        let certificates = response.get("certificates").cloned().unwrap_or(json!([]));
        Ok(serde_json::from_value(certificates)?)
    }

    async fn load_key(&self, certificate: &Certificate) -> Result<KeyHandle> {
        let response = self
            .call(DeviceRequest {
                plugin: "pfx",
                name: "load_key",
                arguments: vec![
                    json!(certificate.disk),
                    json!(certificate.path),
                    json!(certificate.name),
                    json!(certificate.alias),
                ],
            })
            .await?
            .map_err(PipelineError::Device)?;
        required_str(&response, "keyId").map(KeyHandle)
    }

    async fn sign(&self, payload: &str, kind: SignatureKind, key: &KeyHandle) -> Result<String> {
        let request = match kind {
            SignatureKind::Create => DeviceRequest {
                plugin: "pkcs7",
                name: "create_pkcs7",
                arguments: vec![json!(payload), json!(key.0), json!("no")],
            },
            SignatureKind::Append => DeviceRequest {
                plugin: "pkcs7",
                name: "append_pkcs7_attached",
                arguments: vec![json!(payload), json!(key.0)],
            },
        };
        // A refused signing operation is a signature rejection.
        let response = self
            .call(request)
            .await?
            .map_err(PipelineError::InvalidSignature)?;
        required_str(&response, "pkcs7_64")
    }
}
