use super::normalize::{extract_items, normalize_item};
use crate::{
    auth::TokenManager, authority::DocumentAuthority, config::SyncConfig, store::DocumentStore,
    Direction, Result, SessionToken,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to pull from the authority; `None` fields fall back to defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncRequest {
    /// Both directions when absent
    pub direction: Option<Direction>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub incoming: usize,
    pub outgoing: usize,
    /// Items skipped because they could not be normalized or stored
    pub failed: usize,
}

/// Pulls remote document lists into the local store
pub struct StatusSynchronizer {
    authority: Arc<dyn DocumentAuthority>,
    store: DocumentStore,
    config: SyncConfig,
}

impl StatusSynchronizer {
    pub fn new(authority: Arc<dyn DocumentAuthority>, store: DocumentStore, config: SyncConfig) -> Self {
        Self {
            authority,
            store,
            config,
        }
    }

    /// Run one sync pass for `company_id`
    ///
    /// # Arguments
    /// * `company_id` - Local company whose documents are mirrored
    /// * `token` - Company-scoped session token
    /// * `request` - Direction and paging
    ///
    /// # Returns
    /// Per-direction counts of stored items and the number of skipped items.
    /// Fails without any remote call when `token` has expired, and fails as a
    /// whole only when a list request itself fails.
    pub async fn sync(
        &self,
        company_id: &str,
        token: &SessionToken,
        request: &SyncRequest,
    ) -> Result<SyncReport> {
        let user_key = TokenManager::authorize(token)?;
        let page = request.page.unwrap_or(1).max(1);
        let limit = request
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1));
        let directions = match request.direction {
            Some(direction) => vec![direction],
            None => Direction::ALL.to_vec(),
        };

        info!("Starting sync for company {} (page {}, limit {})", company_id, page, limit);
        let mut report = SyncReport::default();

        for direction in directions {
            let body = self
                .authority
                .list_documents(user_key, direction, page, limit)
                .await?;
            let items = extract_items(&body);
            debug!("Fetched {} {} documents", items.len(), direction);

            for item in &items {
                match self.store_item(company_id, item, direction).await {
                    Ok(()) => match direction {
                        Direction::Incoming => report.incoming += 1,
                        Direction::Outgoing => report.outgoing += 1,
                    },
                    Err(e) => {
                        warn!("Skipping {} item for company {}: {}", direction, company_id, e);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "Sync complete for company {}: incoming {}, outgoing {}, failed {}",
            company_id, report.incoming, report.outgoing, report.failed
        );
        Ok(report)
    }

    async fn store_item(
        &self,
        company_id: &str,
        item: &serde_json::Value,
        direction: Direction,
    ) -> Result<()> {
        let doc = normalize_item(item, direction)?;
        self.store.upsert(company_id, &doc, Utc::now()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{expired_token, memory_store, token, MockAuthority};
    use crate::{DocumentStatus, PipelineError, TokenScope};
    use serde_json::json;

    fn company_token() -> SessionToken {
        token(TokenScope::Company("c1".to_string()))
    }

    async fn synchronizer(authority: Arc<MockAuthority>) -> (StatusSynchronizer, DocumentStore) {
        let store = memory_store().await;
        let sync = StatusSynchronizer::new(authority, store.clone(), SyncConfig::default());
        (sync, store)
    }

    fn outgoing() -> SyncRequest {
        SyncRequest {
            direction: Some(Direction::Outgoing),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_outgoing_codes_map_to_draft_and_signed() {
        let authority = Arc::new(MockAuthority::new());
        authority.set_listing(
            Direction::Outgoing,
            json!({ "data": [
                { "doc_id": "d-0", "doc_status": 0, "name": "A-1" },
                { "doc_id": "d-3", "doc_status": 3, "name": "A-2" }
            ]}),
        );
        let (sync, store) = synchronizer(authority.clone()).await;

        let report = sync.sync("c1", &company_token(), &outgoing()).await.unwrap();

        assert_eq!(report, SyncReport { incoming: 0, outgoing: 2, failed: 0 });
        let draft = store.find_by_natural_key("c1", "d-0").await.unwrap().unwrap();
        let signed = store.find_by_natural_key("c1", "d-3").await.unwrap().unwrap();
        assert_eq!(draft.status, DocumentStatus::Draft);
        assert_eq!(signed.status, DocumentStatus::Signed);
        assert_eq!(signed.direction, Direction::Outgoing);
        assert_eq!(authority.calls("list_documents"), 1);
    }

    #[tokio::test]
    async fn test_resync_only_moves_synced_timestamp() {
        let authority = Arc::new(MockAuthority::new());
        authority.set_listing(
            Direction::Outgoing,
            json!([{ "doc_id": "d-1", "status": "pending", "total_sum": "1 000,00",
                     "partnerTin": "301111111", "doc_date": "2026-03-01" }]),
        );
        let (sync, store) = synchronizer(authority).await;

        sync.sync("c1", &company_token(), &outgoing()).await.unwrap();
        let before = store.find_by_natural_key("c1", "d-1").await.unwrap().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        sync.sync("c1", &company_token(), &outgoing()).await.unwrap();
        let after = store.find_by_natural_key("c1", "d-1").await.unwrap().unwrap();

        assert!(after.last_synced_at > before.last_synced_at);
        let mut after_same_time = after.clone();
        after_same_time.last_synced_at = before.last_synced_at;
        assert_eq!(after_same_time, before);
        assert_eq!(store.list("c1", Direction::Outgoing).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_items_are_counted_and_skipped() {
        let authority = Arc::new(MockAuthority::new());
        authority.set_listing(
            Direction::Incoming,
            json!({ "documents": [
                { "doc_id": "ok-1", "status": "Подписан" },
                { "status": 3 },
                { "doc_id": "bad-date", "doc_date": "someday" },
                "not an object",
                { "doc_id": "ok-2", "status": 4 }
            ]}),
        );
        let (sync, store) = synchronizer(authority).await;

        let report = sync
            .sync(
                "c1",
                &company_token(),
                &SyncRequest {
                    direction: Some(Direction::Incoming),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report, SyncReport { incoming: 2, outgoing: 0, failed: 3 });
        let ok_2 = store.find_by_natural_key("c1", "ok-2").await.unwrap().unwrap();
        assert_eq!(ok_2.status, DocumentStatus::Rejected);
    }

    #[tokio::test]
    async fn test_no_direction_syncs_both() {
        let authority = Arc::new(MockAuthority::new());
        authority.set_listing(Direction::Incoming, json!({ "data": [{ "doc_id": "in-1" }] }));
        authority.set_listing(Direction::Outgoing, json!({ "data": [{ "doc_id": "out-1" }] }));
        let (sync, _store) = synchronizer(authority.clone()).await;

        let report = sync
            .sync("c1", &company_token(), &SyncRequest::default())
            .await
            .unwrap();

        assert_eq!(report, SyncReport { incoming: 1, outgoing: 1, failed: 0 });
        assert_eq!(authority.calls("list_documents"), 2);
    }

    #[tokio::test]
    async fn test_expired_token_makes_no_request() {
        let authority = Arc::new(MockAuthority::new());
        let (sync, _store) = synchronizer(authority.clone()).await;

        let err = sync
            .sync("c1", &expired_token(TokenScope::Company("c1".into())), &outgoing())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::TokenExpired(_)));
        assert_eq!(authority.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_the_pass() {
        let authority = Arc::new(MockAuthority::new());
        authority.fail_listing(Direction::Outgoing);
        let (sync, _store) = synchronizer(authority).await;

        let err = sync.sync("c1", &company_token(), &outgoing()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
