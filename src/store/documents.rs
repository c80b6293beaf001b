//! SQLite-backed document mirror.

use super::schema::{DocumentRow, SCHEMA};
use crate::{
    Company, Direction, Document, DocumentStatus, PendingDocument, PipelineError, Result,
    SignableCompany,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// Normalized remote fields written by an upsert
///
/// Absent remote fields are `None` and overwrite whatever was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentUpsert {
    pub external_id: String,
    pub direction: Direction,
    pub status: DocumentStatus,
    pub document_number: Option<String>,
    pub document_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub currency: String,
    pub counterparty_name: Option<String>,
    pub counterparty_tin: Option<String>,
    pub contract_number: Option<String>,
    pub contract_date: Option<NaiveDate>,
    pub payload: serde_json::Value,
}

/// Most rows a listing or search returns
pub const LIST_LIMIT: i64 = 500;

/// Local mirror of authority documents
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    /// Open (creating if missing) the database at `url` and ensure the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Each in-memory connection is its own database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Insert or update a document by its natural key
    ///
    /// A row only moves forward in time: an upsert carrying an older
    /// `synced_at` than the stored row is ignored. Returns the local id.
    pub async fn upsert(
        &self,
        company_id: &str,
        doc: &DocumentUpsert,
        synced_at: DateTime<Utc>,
    ) -> Result<String> {
        sqlx::query(
            "INSERT INTO documents (
                id, company_id, external_id, direction, status, document_number,
                document_date, amount, currency, counterparty_name, counterparty_tin,
                contract_number, contract_date, payload, last_synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (company_id, external_id) DO UPDATE SET
                direction = excluded.direction,
                status = excluded.status,
                document_number = excluded.document_number,
                document_date = excluded.document_date,
                amount = excluded.amount,
                counterparty_name = excluded.counterparty_name,
                counterparty_tin = excluded.counterparty_tin,
                contract_number = excluded.contract_number,
                contract_date = excluded.contract_date,
                payload = excluded.payload,
                last_synced_at = excluded.last_synced_at
            WHERE documents.last_synced_at <= excluded.last_synced_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(company_id)
        .bind(&doc.external_id)
        .bind(doc.direction.as_str())
        .bind(doc.status.as_str())
        .bind(&doc.document_number)
        .bind(doc.document_date)
        .bind(doc.amount.map(|a| a.to_string()))
        .bind(&doc.currency)
        .bind(&doc.counterparty_name)
        .bind(&doc.counterparty_tin)
        .bind(&doc.contract_number)
        .bind(doc.contract_date)
        .bind(serde_json::to_string(&doc.payload)?)
        .bind(synced_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => PipelineError::Conflict {
                company_id: company_id.to_string(),
                external_id: doc.external_id.clone(),
            },
            other => other.into(),
        })?;

        let id: String =
            sqlx::query_scalar("SELECT id FROM documents WHERE company_id = ? AND external_id = ?")
                .bind(company_id)
                .bind(&doc.external_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Document> {
        sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PipelineError::DocumentNotFound(id.to_string()))?
            .try_into()
    }

    pub async fn find_by_natural_key(
        &self,
        company_id: &str,
        external_id: &str,
    ) -> Result<Option<Document>> {
        sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE company_id = ? AND external_id = ?",
        )
        .bind(company_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Document::try_from)
        .transpose()
    }

    /// Documents of one company and direction, newest first, at most [`LIST_LIMIT`]
    pub async fn list(&self, company_id: &str, direction: Direction) -> Result<Vec<Document>> {
        sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE company_id = ? AND direction = ?
             ORDER BY document_date DESC, last_synced_at DESC
             LIMIT ?",
        )
        .bind(company_id)
        .bind(direction.as_str())
        .bind(LIST_LIMIT)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Document::try_from)
        .collect()
    }

    /// Like [`list`](Self::list), narrowed to documents whose number,
    /// counterparty or contract matches `query` (case-insensitive)
    pub async fn search(
        &self,
        company_id: &str,
        direction: Direction,
        query: &str,
    ) -> Result<Vec<Document>> {
        let pattern = format!("%{}%", query.trim().to_lowercase());
        sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE company_id = ?1 AND direction = ?2
             AND (lower(document_number) LIKE ?3 OR lower(counterparty_name) LIKE ?3
                  OR counterparty_tin LIKE ?3 OR lower(contract_number) LIKE ?3)
             ORDER BY document_date DESC, last_synced_at DESC
             LIMIT ?4",
        )
        .bind(company_id)
        .bind(direction.as_str())
        .bind(pattern)
        .bind(LIST_LIMIT)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Document::try_from)
        .collect()
    }

    /// Transition a document to SIGNED
    ///
    /// Returns `false` when it already was SIGNED, so a replayed ack is a no-op.
    pub async fn mark_signed(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = ?, signed_at = ?, last_synced_at = ?
             WHERE id = ? AND status <> ?",
        )
        .bind(DocumentStatus::Signed.as_str())
        .bind(at)
        .bind(at)
        .bind(id)
        .bind(DocumentStatus::Signed.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("Document {} marked SIGNED", id);
            return Ok(true);
        }
        // Distinguish "already signed" from "no such document".
        self.get(id).await?;
        Ok(false)
    }

    pub async fn upsert_company(&self, company: &Company) -> Result<()> {
        sqlx::query(
            "INSERT INTO companies (id, name, tin) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, tin = excluded.tin",
        )
        .bind(&company.id)
        .bind(&company.name)
        .bind(&company.tin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that `operator_id` acts for `company_id`
    pub async fn link_operator(&self, operator_id: &str, company_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO operator_companies (operator_id, company_id) VALUES (?, ?)",
        )
        .bind(operator_id)
        .bind(company_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every company of the operator that still has PENDING documents
    ///
    /// Documents come in a stable order (date, then external id) so a batch
    /// run submits them deterministically.
    pub async fn signable_companies(&self, operator_id: &str) -> Result<Vec<SignableCompany>> {
        let companies = sqlx::query_as::<_, (String, String, String)>(
            "SELECT c.id, c.name, c.tin FROM companies c
             JOIN operator_companies oc ON oc.company_id = c.id
             WHERE oc.operator_id = ?
             ORDER BY c.name, c.id",
        )
        .bind(operator_id)
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::new();
        for (id, name, tin) in companies {
            let rows = sqlx::query_as::<_, DocumentRow>(
                "SELECT * FROM documents WHERE company_id = ? AND status = ?
                 ORDER BY document_date, external_id",
            )
            .bind(&id)
            .bind(DocumentStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await?;

            if rows.is_empty() {
                continue;
            }

            let documents = rows
                .into_iter()
                .map(|row| -> Result<PendingDocument> {
                    let doc = Document::try_from(row)?;
                    Ok(PendingDocument {
                        id: doc.id,
                        external_id: doc.external_id,
                        number: doc.document_number,
                        date: doc.document_date,
                        amount: doc.amount,
                        direction: doc.direction,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            result.push(SignableCompany {
                company: Company { id, name, tin },
                documents,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_store;
    use chrono::Duration;
    use serde_json::json;

    fn upsert(external_id: &str, status: DocumentStatus) -> DocumentUpsert {
        DocumentUpsert {
            external_id: external_id.to_string(),
            direction: Direction::Outgoing,
            status,
            document_number: Some("INV-1".to_string()),
            document_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            amount: Some(Decimal::new(150050, 2)),
            currency: "UZS".to_string(),
            counterparty_name: Some("Buyer LLC".to_string()),
            counterparty_tin: Some("301234567".to_string()),
            contract_number: None,
            contract_date: None,
            payload: json!({ "doc_id": external_id }),
        }
    }

    #[tokio::test]
    async fn test_upsert_never_duplicates_natural_key() {
        let store = memory_store().await;
        let now = Utc::now();

        let first = store.upsert("c1", &upsert("ext-1", DocumentStatus::Pending), now).await.unwrap();
        let second = store
            .upsert("c1", &upsert("ext-1", DocumentStatus::Signed), now + Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(first, second);
        let docs = store.list("c1", Direction::Outgoing).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status, DocumentStatus::Signed);
        assert_eq!(docs[0].amount, Some(Decimal::new(150050, 2)));
    }

    #[tokio::test]
    async fn test_same_external_id_in_other_company_is_separate() {
        let store = memory_store().await;
        let now = Utc::now();

        let a = store.upsert("c1", &upsert("ext-1", DocumentStatus::Pending), now).await.unwrap();
        let b = store.upsert("c2", &upsert("ext-1", DocumentStatus::Pending), now).await.unwrap();

        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_older_upsert_loses() {
        let store = memory_store().await;
        let now = Utc::now();

        let id = store.upsert("c1", &upsert("ext-1", DocumentStatus::Signed), now).await.unwrap();
        store
            .upsert("c1", &upsert("ext-1", DocumentStatus::Pending), now - Duration::seconds(5))
            .await
            .unwrap();

        assert_eq!(store.get(&id).await.unwrap().status, DocumentStatus::Signed);
    }

    #[tokio::test]
    async fn test_absent_fields_overwrite_with_null() {
        let store = memory_store().await;
        let now = Utc::now();
        let id = store.upsert("c1", &upsert("ext-1", DocumentStatus::Pending), now).await.unwrap();

        let mut bare = upsert("ext-1", DocumentStatus::Pending);
        bare.counterparty_name = None;
        bare.amount = None;
        store.upsert("c1", &bare, now + Duration::seconds(1)).await.unwrap();

        let doc = store.get(&id).await.unwrap();
        assert_eq!(doc.counterparty_name, None);
        assert_eq!(doc.amount, None);
    }

    #[tokio::test]
    async fn test_search_matches_number_and_counterparty() {
        let store = memory_store().await;
        let now = Utc::now();
        let mut other = upsert("ext-2", DocumentStatus::Pending);
        other.document_number = Some("ACT-9".to_string());
        other.counterparty_name = Some("Seller Group".to_string());
        store.upsert("c1", &upsert("ext-1", DocumentStatus::Pending), now).await.unwrap();
        store.upsert("c1", &other, now).await.unwrap();

        let by_number = store.search("c1", Direction::Outgoing, "inv").await.unwrap();
        let by_partner = store.search("c1", Direction::Outgoing, "seller").await.unwrap();
        let by_tin = store.search("c1", Direction::Outgoing, "30123").await.unwrap();

        assert_eq!(by_number.len(), 1);
        assert_eq!(by_number[0].external_id, "ext-1");
        assert_eq!(by_partner[0].external_id, "ext-2");
        assert_eq!(by_tin.len(), 2);
        assert!(store.search("c1", Direction::Incoming, "inv").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_search_are_capped() {
        let store = memory_store().await;
        let now = Utc::now();
        for n in 0..520 {
            store
                .upsert("c1", &upsert(&format!("ext-{n}"), DocumentStatus::Pending), now)
                .await
                .unwrap();
        }

        let listed = store.list("c1", Direction::Outgoing).await.unwrap();
        let found = store.search("c1", Direction::Outgoing, "inv").await.unwrap();

        assert_eq!(listed.len(), LIST_LIMIT as usize);
        assert_eq!(found.len(), LIST_LIMIT as usize);
    }

    #[tokio::test]
    async fn test_mark_signed_second_ack_is_noop() {
        let store = memory_store().await;
        let id = store
            .upsert("c1", &upsert("ext-1", DocumentStatus::Pending), Utc::now())
            .await
            .unwrap();

        assert!(store.mark_signed(&id, Utc::now()).await.unwrap());
        assert!(!store.mark_signed(&id, Utc::now()).await.unwrap());
        let doc = store.get(&id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Signed);
        assert!(doc.signed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_signed_unknown_document() {
        let store = memory_store().await;
        let err = store.mark_signed("missing", Utc::now()).await.unwrap_err();
        assert!(matches!(err, PipelineError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn test_signable_companies_only_pending() {
        let store = memory_store().await;
        let now = Utc::now();
        for (id, tin) in [("c1", "111"), ("c2", "222"), ("c3", "333")] {
            store
                .upsert_company(&Company { id: id.into(), name: id.to_uppercase(), tin: tin.into() })
                .await
                .unwrap();
        }
        store.link_operator("op", "c1").await.unwrap();
        store.link_operator("op", "c2").await.unwrap();
        store.link_operator("someone-else", "c3").await.unwrap();

        store.upsert("c1", &upsert("b", DocumentStatus::Pending), now).await.unwrap();
        store.upsert("c1", &upsert("a", DocumentStatus::Pending), now).await.unwrap();
        store.upsert("c1", &upsert("z", DocumentStatus::Signed), now).await.unwrap();
        store.upsert("c2", &upsert("x", DocumentStatus::Draft), now).await.unwrap();
        store.upsert("c3", &upsert("y", DocumentStatus::Pending), now).await.unwrap();

        let signable = store.signable_companies("op").await.unwrap();

        assert_eq!(signable.len(), 1);
        assert_eq!(signable[0].company.tin, "111");
        let ids: Vec<_> = signable[0].documents.iter().map(|d| d.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
