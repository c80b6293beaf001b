use crate::{
    authority::DocumentAuthority, PipelineError, Result, SessionToken, SignedProof, TokenScope,
};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Issues session tokens and keeps the latest one per scope
#[derive(Clone)]
pub struct TokenManager {
    authority: Arc<dyn DocumentAuthority>,
    tokens: Arc<RwLock<HashMap<TokenScope, SessionToken>>>,
    ttl: Duration,
}

impl TokenManager {
    pub fn new(authority: Arc<dyn DocumentAuthority>, ttl_minutes: i64) -> Self {
        Self {
            authority,
            tokens: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Pure expiry check against wall-clock time
    pub fn valid(token: &SessionToken) -> bool {
        token.is_valid_at(Utc::now())
    }

    /// Gate for every authorized remote call
    ///
    /// Returns the token value when it may be used, `TokenExpired` otherwise.
    pub fn authorize(token: &SessionToken) -> Result<&str> {
        if Self::valid(token) {
            Ok(&token.value)
        } else {
            Err(PipelineError::TokenExpired(token.scope.clone()))
        }
    }

    /// Exchange a freshly signed proof for a session token
    ///
    /// The proof is timestamped by the authority first, then the timestamp
    /// token is exchanged for a session token bound to `tin`.
    pub async fn exchange(
        &self,
        scope: TokenScope,
        tin: &str,
        proof: &SignedProof,
    ) -> Result<SessionToken> {
        info!("Exchanging signed proof for {} token", scope);
        let stamped = self.authority.add_timestamp(proof).await?;
        let value = match self.authority.exchange_token(tin, &stamped).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Token exchange for {} failed: {}", scope, e);
                return Err(e);
            }
        };
        Ok(self.store(scope, value).await)
    }

    /// Derive a company-scoped token from a valid operator token
    pub async fn derive_company(
        &self,
        operator: &SessionToken,
        company_id: &str,
        company_tin: &str,
    ) -> Result<SessionToken> {
        let operator_key = Self::authorize(operator)?;
        let value = self.authority.login_company(operator_key, company_tin).await?;
        info!("Obtained token for company {}", company_id);
        Ok(self
            .store(TokenScope::Company(company_id.to_string()), value)
            .await)
    }

    /// The held token for `scope`, if it is still valid
    pub async fn current(&self, scope: &TokenScope) -> Result<SessionToken> {
        let tokens = self.tokens.read().await;
        match tokens.get(scope) {
            Some(token) if Self::valid(token) => Ok(token.clone()),
            _ => Err(PipelineError::TokenExpired(scope.clone())),
        }
    }

    /// Keep an externally obtained token (e.g. restored from a login flow)
    pub async fn insert(&self, token: SessionToken) {
        let mut tokens = self.tokens.write().await;
        tokens.insert(token.scope.clone(), token);
    }

    pub async fn invalidate(&self, scope: &TokenScope) {
        let mut tokens = self.tokens.write().await;
        tokens.remove(scope);
    }

    async fn store(&self, scope: TokenScope, value: String) -> SessionToken {
        let token = SessionToken {
            scope,
            value,
            expires_at: Utc::now() + self.ttl,
        };
        self.insert(token.clone()).await;
        token
    }
}
