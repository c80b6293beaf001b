//! API Server Module
//!
//! This module implements the JSON-RPC server the HTTP layer talks to. Caller
//! authentication happens upstream; operator and company identifiers arrive
//! as request parameters.
//!
//! # Methods
//! - `exchangeToken`: exchange a signed proof for an operator token
//! - `loginCompany`: derive a company token from the operator token
//! - `syncDocuments`: pull remote document lists into the local store
//! - `listDocuments`: read the local mirror, optionally filtered
//! - `signableDocuments`: pending documents per company, the batch input
//! - `getSignData`: payload and signature type for one document
//! - `submitSignature`: queue a finished signature
//! - `deadJobs` / `resubmitJob`: dead-letter inspection and replay

use crate::{
    auth::TokenManager,
    config::Config,
    prepare::SignaturePreparer,
    queue::{JobId, JobProducer, JobQueue, JobRecord},
    store::DocumentStore,
    sync::{StatusSynchronizer, SyncRequest},
    Direction, PipelineError, SignatureKind, SignedProof, SigningJob, TokenScope,
};
use axum::{extract::State, routing::post, Json, Router};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state that is accessible across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub store: DocumentStore,
    pub tokens: TokenManager,
    pub synchronizer: Arc<StatusSynchronizer>,
    pub preparer: Arc<SignaturePreparer>,
    pub producer: JobProducer,
    pub queue: Arc<dyn JobQueue>,
}

/// The main API server struct
pub struct Server {
    config: Config,
    state: AppState,
}

impl Server {
    /// Creates a new API server instance
    ///
    /// # Arguments
    /// * `config` - Service configuration (host, port, etc.)
    /// * `state` - Components shared by every request
    pub fn new(config: Config, state: AppState) -> Self {
        Self { config, state }
    }

    /// Starts the API server and begins listening for incoming requests
    ///
    /// # Returns
    /// `Ok(())` if the server ran to completion, or an error if binding fails
    pub async fn start(self) -> anyhow::Result<()> {
        let app = router(self.state);

        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);
        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Router with the single JSON-RPC endpoint at "/"
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .with_state(state)
}

/// JSON-RPC 2.0 request structure
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Value,
}

/// JSON-RPC 2.0 response structure
///
/// Either `result` or `error` is populated, never both.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Value,
}

/// JSON-RPC error object
///
/// Codes: -32601 unknown method, -32602 invalid params, -32001 session token
/// expired (log in again), -32004 not found, -32000 anything else.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcError {
    fn method_not_found() -> Self {
        Self {
            code: -32601,
            message: "Method not found".to_string(),
            data: None,
        }
    }

    fn invalid_params(message: impl std::fmt::Display) -> Self {
        Self {
            code: -32602,
            message: format!("Invalid params: {}", message),
            data: None,
        }
    }
}

impl From<PipelineError> for JsonRpcError {
    fn from(e: PipelineError) -> Self {
        let code = match e {
            PipelineError::TokenExpired(_) => -32001,
            PipelineError::DocumentNotFound(_) | PipelineError::JobNotFound(_) => -32004,
            _ => -32000,
        };
        Self {
            code,
            message: e.to_string(),
            data: Some(json!({ "kind": e.kind() })),
        }
    }
}

type RpcResult = Result<Value, JsonRpcError>;

/// Main RPC request handler
///
/// Routes the request to the method handler and wraps its outcome in a
/// JSON-RPC response.
async fn handle_rpc(
    State(state): State<AppState>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    info!("Received RPC request: {}", request.method);

    let params = request.params;
    let outcome = match request.method.as_str() {
        "exchangeToken" => exchange_token(&state, params).await,
        "loginCompany" => login_company(&state, params).await,
        "syncDocuments" => sync_documents(&state, params).await,
        "listDocuments" => list_documents(&state, params).await,
        "signableDocuments" => signable_documents(&state, params).await,
        "getSignData" => get_sign_data(&state, params).await,
        "submitSignature" => submit_signature(&state, params).await,
        "deadJobs" => dead_jobs(&state),
        "resubmitJob" => resubmit_job(&state, params),
        _ => Err(JsonRpcError::method_not_found()),
    };

    let (result, error) = match outcome {
        Ok(result) => (Some(result), None),
        Err(error) => {
            warn!("RPC {} failed: {}", request.method, error.message);
            (None, Some(error))
        }
    };
    Json(JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        result,
        error,
        id: request.id,
    })
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(params).map_err(JsonRpcError::invalid_params)
}

fn to_result<T: Serialize>(value: T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| PipelineError::from(e).into())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeTokenParams {
    operator_id: String,
    tin: String,
    pkcs7: String,
    signature_hex: String,
}

async fn exchange_token(state: &AppState, params: Value) -> RpcResult {
    let p: ExchangeTokenParams = parse(params)?;
    let proof = SignedProof {
        pkcs7_b64: p.pkcs7,
        signature_hex: p.signature_hex,
    };
    let token = state
        .tokens
        .exchange(TokenScope::Operator(p.operator_id), &p.tin, &proof)
        .await?;
    Ok(json!({ "scope": token.scope, "expiresAt": token.expires_at }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginCompanyParams {
    operator_id: String,
    company_id: String,
    company_tin: String,
}

async fn login_company(state: &AppState, params: Value) -> RpcResult {
    let p: LoginCompanyParams = parse(params)?;
    let operator = state
        .tokens
        .current(&TokenScope::Operator(p.operator_id))
        .await?;
    let token = state
        .tokens
        .derive_company(&operator, &p.company_id, &p.company_tin)
        .await?;
    Ok(json!({ "scope": token.scope, "expiresAt": token.expires_at }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncParams {
    company_id: String,
    #[serde(flatten)]
    request: SyncRequest,
}

async fn sync_documents(state: &AppState, params: Value) -> RpcResult {
    let p: SyncParams = parse(params)?;
    let token = state
        .tokens
        .current(&TokenScope::Company(p.company_id.clone()))
        .await?;
    let report = state.synchronizer.sync(&p.company_id, &token, &p.request).await?;
    to_result(report)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    company_id: String,
    direction: Direction,
    search: Option<String>,
}

async fn list_documents(state: &AppState, params: Value) -> RpcResult {
    let p: ListParams = parse(params)?;
    let documents = match p.search.as_deref().map(str::trim) {
        Some(query) if !query.is_empty() => {
            state.store.search(&p.company_id, p.direction, query).await?
        }
        _ => state.store.list(&p.company_id, p.direction).await?,
    };
    Ok(json!({ "total": documents.len(), "documents": documents }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperatorParams {
    operator_id: String,
}

async fn signable_documents(state: &AppState, params: Value) -> RpcResult {
    let p: OperatorParams = parse(params)?;
    let companies = state.store.signable_companies(&p.operator_id).await?;
    to_result(companies)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentParams {
    document_id: String,
}

async fn get_sign_data(state: &AppState, params: Value) -> RpcResult {
    let p: DocumentParams = parse(params)?;
    let document = state.store.get(&p.document_id).await?;
    let token = state
        .tokens
        .current(&TokenScope::Company(document.company_id))
        .await?;
    let request = state.preparer.prepare(&p.document_id, &token).await?;
    let operation = match request.kind {
        SignatureKind::Create => "create_pkcs7",
        SignatureKind::Append => "append_pkcs7_attached",
    };
    Ok(json!({
        "documentId": request.document_id,
        "signData": request.payload,
        "type": operation,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitParams {
    document_id: String,
    signature: String,
    operator_id: String,
}

/// Queue a signature produced by the client
///
/// The company token is the one held for the document's company; the client
/// never supplies token values.
async fn submit_signature(state: &AppState, params: Value) -> RpcResult {
    let p: SubmitParams = parse(params)?;
    if p.signature.trim().is_empty() {
        return Err(JsonRpcError::invalid_params("signature is empty"));
    }
    let document = state.store.get(&p.document_id).await?;
    let company_token = state
        .tokens
        .current(&TokenScope::Company(document.company_id.clone()))
        .await?;

    let job_id = state.producer.submit(SigningJob {
        document_id: document.id,
        external_document_id: document.external_id,
        signature: p.signature,
        company_id: document.company_id,
        company_token,
        operator_id: p.operator_id,
        direction: document.direction,
    });
    Ok(json!({ "jobId": job_id }))
}

fn job_summary(record: &JobRecord) -> Value {
    json!({
        "id": record.id,
        "state": record.state,
        "documentId": record.job.document_id,
        "companyId": record.job.company_id,
        "attempts": record.attempts.len(),
        "lastError": record.last_error(),
        "enqueuedAt": record.enqueued_at,
    })
}

fn dead_jobs(state: &AppState) -> RpcResult {
    let jobs: Vec<Value> = state.queue.dead_letters().iter().map(job_summary).collect();
    Ok(json!({ "jobs": jobs }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobParams {
    job_id: String,
}

fn resubmit_job(state: &AppState, params: Value) -> RpcResult {
    let p: JobParams = parse(params)?;
    let id: JobId = p.job_id.parse()?;
    state.queue.resubmit(id)?;
    info!("Job {} resubmitted", id);
    Ok(json!({ "ok": true }))
}
