//! Table definitions and row mapping.

use crate::{Document, PipelineError};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

pub(crate) const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS companies (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        tin TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS operator_companies (
        operator_id TEXT NOT NULL,
        company_id TEXT NOT NULL REFERENCES companies(id),
        PRIMARY KEY (operator_id, company_id)
    )",
    "CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        company_id TEXT NOT NULL,
        external_id TEXT NOT NULL,
        direction TEXT NOT NULL,
        status TEXT NOT NULL,
        document_number TEXT,
        document_date TEXT,
        amount TEXT,
        currency TEXT NOT NULL,
        counterparty_name TEXT,
        counterparty_tin TEXT,
        contract_number TEXT,
        contract_date TEXT,
        payload TEXT NOT NULL,
        last_synced_at TEXT NOT NULL,
        signed_at TEXT,
        UNIQUE (company_id, external_id)
    )",
    "CREATE INDEX IF NOT EXISTS documents_company_status ON documents (company_id, status)",
];

/// Row type for the `documents` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: String,
    pub company_id: String,
    pub external_id: String,
    pub direction: String,
    pub status: String,
    pub document_number: Option<String>,
    pub document_date: Option<NaiveDate>,
    pub amount: Option<String>, // Decimal stored as TEXT
    pub currency: String,
    pub counterparty_name: Option<String>,
    pub counterparty_tin: Option<String>,
    pub contract_number: Option<String>,
    pub contract_date: Option<NaiveDate>,
    pub payload: String,
    pub last_synced_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DocumentRow> for Document {
    type Error = PipelineError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let amount = row
            .amount
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .map_err(|e| PipelineError::Malformed(format!("stored amount: {e}")))?;

        Ok(Document {
            direction: row.direction.parse().map_err(PipelineError::Malformed)?,
            status: row.status.parse().map_err(PipelineError::Malformed)?,
            payload: serde_json::from_str(&row.payload)?,
            id: row.id,
            company_id: row.company_id,
            external_id: row.external_id,
            document_number: row.document_number,
            document_date: row.document_date,
            amount,
            currency: row.currency,
            counterparty_name: row.counterparty_name,
            counterparty_tin: row.counterparty_tin,
            contract_number: row.contract_number,
            contract_date: row.contract_date,
            last_synced_at: row.last_synced_at,
            signed_at: row.signed_at,
        })
    }
}
