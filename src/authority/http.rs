//! HTTP client for the document authority's partner API.

use super::DocumentAuthority;
use crate::{config::AuthorityConfig, Direction, PipelineError, Result, SignedProof};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const MAX_PAGE_SIZE: u32 = 100;

/// Authority client backed by `reqwest`
#[derive(Clone)]
pub struct HttpAuthority {
    base_url: String,
    timestamp_url: String,
    partner_token: String,
    locale: String,
    client: Client,
}

impl HttpAuthority {
    pub fn new(config: &AuthorityConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timestamp_url: config.timestamp_url.trim_end_matches('/').to_string(),
            partner_token: config.partner_token.trim().to_string(),
            locale: config.locale.clone(),
            client,
        })
    }

    /// Attach the headers every document call carries
    fn authorized(&self, request: RequestBuilder, user_key: &str) -> Result<RequestBuilder> {
        if self.partner_token.is_empty() {
            return Err(PipelineError::Configuration(
                "authority partner token is not configured".to_string(),
            ));
        }
        Ok(request
            .header("user-key", user_key)
            .header("Partner-Authorization", &self.partner_token)
            .header("Accept-Language", &self.locale))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn transport(err: reqwest::Error) -> PipelineError {
    PipelineError::RemoteUnavailable(err.to_string())
}

/// Read the body of a response, classifying failures
///
/// 5xx always means the authority is unavailable; other non-success
/// codes are handed to `reject` so each endpoint can name its own failure.
async fn read_body(
    response: Response,
    reject: impl FnOnce(u16, String) -> PipelineError,
) -> Result<String> {
    let status = response.status();
    let body = response.text().await.map_err(transport)?;
    if status.is_success() {
        return Ok(body);
    }
    if status.is_server_error() {
        return Err(PipelineError::RemoteUnavailable(format!("{status}: {body}")));
    }
    Err(reject(status.as_u16(), body))
}

fn remote(status: u16, body: String) -> PipelineError {
    PipelineError::Remote { status, body }
}

fn auth_rejection(status: u16, body: String) -> PipelineError {
    match status {
        400 | 401 | 403 => PipelineError::AuthFailed(body),
        _ => remote(status, body),
    }
}

/// Pull a required string field out of a JSON body
fn string_field(body: &str, field: &str) -> Result<String> {
    let value: Value = serde_json::from_str(body)?;
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::Malformed(format!("response missing {field}")))
}

#[async_trait]
impl DocumentAuthority for HttpAuthority {
    async fn list_documents(
        &self,
        user_key: &str,
        direction: Direction,
        page: u32,
        limit: u32,
    ) -> Result<Value> {
        let page = page.max(1).to_string();
        let limit = limit.clamp(1, MAX_PAGE_SIZE).to_string();
        let url = Url::parse_with_params(
            &self.url("/v2/documents"),
            &[
                ("owner", direction.owner_flag()),
                ("page", page.as_str()),
                ("limit", limit.as_str()),
            ],
        )
        .map_err(|e| PipelineError::Configuration(format!("authority url: {e}")))?;

        debug!("Listing {} documents, page {}", direction, page);
        let request = self.authorized(self.client.get(url), user_key)?;
        let response = request.send().await.map_err(transport)?;
        let body = read_body(response, remote).await?;

        // Some deployments answer with a bare string; keep it for the caller to reject.
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    async fn add_timestamp(&self, proof: &SignedProof) -> Result<String> {
        let url = format!("{}/v1/dsvs/timestamp", self.timestamp_url);
        let response = self
            .client
            .post(url)
            .json(&json!({ "pkcs7": proof.pkcs7_b64, "signatureHex": proof.signature_hex }))
            .send()
            .await
            .map_err(transport)?;
        let body = read_body(response, auth_rejection).await?;
        string_field(&body, "timeStampTokenB64")
    }

    async fn exchange_token(&self, tin: &str, timestamp_token: &str) -> Result<String> {
        let url = self.url(&format!("/v1/auth/{}/token/{}", tin, self.locale));
        let response = self
            .client
            .post(url)
            .json(&json!({ "signature": timestamp_token }))
            .send()
            .await
            .map_err(transport)?;
        let body = read_body(response, auth_rejection).await?;
        string_field(&body, "token")
    }

    async fn login_company(&self, operator_key: &str, company_tin: &str) -> Result<String> {
        let url = self.url(&format!("/v1/accountant/companies/{}/token", company_tin));
        let request = self.authorized(self.client.post(url), operator_key)?;
        let response = request.send().await.map_err(transport)?;
        let body = read_body(response, auth_rejection).await?;
        string_field(&body, "token")
    }

    async fn document_details(
        &self,
        user_key: &str,
        external_id: &str,
        direction: Direction,
    ) -> Result<Value> {
        let url = Url::parse_with_params(
            &self.url(&format!("/v1/documents/{}", external_id)),
            &[("owner", direction.owner_flag())],
        )
        .map_err(|e| PipelineError::Configuration(format!("authority url: {e}")))?;
        let request = self.authorized(self.client.get(url), user_key)?;
        let response = request.send().await.map_err(transport)?;
        let body = read_body(response, |status, body| match status {
            404 => PipelineError::DocumentNotFound(external_id.to_string()),
            _ => remote(status, body),
        })
        .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn submit_signature(
        &self,
        user_key: &str,
        external_id: &str,
        signature: &str,
    ) -> Result<()> {
        let url = self.url(&format!("/v1/documents/{}/sign", external_id));
        let request = self.authorized(self.client.post(url), user_key)?;
        let response = request
            .json(&json!({ "signature": signature }))
            .send()
            .await
            .map_err(transport)?;
        read_body(response, |status, body| match status {
            400 | 422 => PipelineError::InvalidSignature(body),
            _ => remote(status, body),
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(partner_token: &str) -> AuthorityConfig {
        AuthorityConfig {
            base_url: "http://127.0.0.1:9/".to_string(),
            timestamp_url: "http://127.0.0.1:9".to_string(),
            partner_token: partner_token.to_string(),
            timeout_ms: 1_000,
            locale: "ru".to_string(),
        }
    }

    #[test]
    fn test_base_url_is_normalized() {
        let authority = HttpAuthority::new(&config("p")).unwrap();
        assert_eq!(authority.url("/v2/documents"), "http://127.0.0.1:9/v2/documents");
    }

    #[tokio::test]
    async fn test_missing_partner_token_fails_before_request() {
        let authority = HttpAuthority::new(&config("  ")).unwrap();
        let err = authority
            .list_documents("key", Direction::Outgoing, 1, 20)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_string_field_requires_non_empty_value() {
        assert_eq!(string_field(r#"{"token":"abc"}"#, "token").unwrap(), "abc");
        assert!(matches!(
            string_field(r#"{"token":""}"#, "token"),
            Err(PipelineError::Malformed(_))
        ));
    }
}
