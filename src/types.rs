use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of the exchange a document sits on, from the company's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Incoming, Direction::Outgoing];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "INCOMING",
            Direction::Outgoing => "OUTGOING",
        }
    }

    /// Value of the authority's `owner` query parameter
    pub fn owner_flag(&self) -> &'static str {
        match self {
            Direction::Incoming => "0",
            Direction::Outgoing => "1",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCOMING" => Ok(Direction::Incoming),
            "OUTGOING" => Ok(Direction::Outgoing),
            other => Err(format!("unknown direction {other}")),
        }
    }
}

/// Canonical local status every remote encoding is normalized into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentStatus {
    Draft,
    Pending,
    Signed,
    Rejected,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Signed => "SIGNED",
            DocumentStatus::Rejected => "REJECTED",
            DocumentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(DocumentStatus::Draft),
            "PENDING" => Ok(DocumentStatus::Pending),
            "SIGNED" => Ok(DocumentStatus::Signed),
            "REJECTED" => Ok(DocumentStatus::Rejected),
            "CANCELLED" => Ok(DocumentStatus::Cancelled),
            other => Err(format!("unknown document status {other}")),
        }
    }
}

/// Locally cached mirror of a document held by the authority
///
/// `(company_id, external_id)` is the natural key; `id` is the local primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub company_id: String,
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
    /// Raw item as the authority returned it, kept for display
    pub payload: serde_json::Value,
    pub last_synced_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
}

/// Who a session token speaks for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum TokenScope {
    Company(String),
    Operator(String),
}

impl TokenScope {
    pub fn id(&self) -> &str {
        match self {
            TokenScope::Company(id) | TokenScope::Operator(id) => id,
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenScope::Company(id) => write!(f, "company {id}"),
            TokenScope::Operator(id) => write!(f, "operator {id}"),
        }
    }
}

/// Short-lived authority session token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub scope: TokenScope,
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// Token values never reach the logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("scope", &self.scope)
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Everything the queue worker needs to submit one finished signature
///
/// Replaying the same job is safe: it always targets the same external
/// document with the same signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningJob {
    pub document_id: String,
    pub external_document_id: String,
    pub signature: String,
    pub company_id: String,
    pub company_token: SessionToken,
    pub operator_id: String,
    pub direction: Direction,
}

/// Flavour of signature the device must produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    /// Fresh signature over a document we author
    Create,
    /// Counter-signature appended to the sender's attached signature
    Append,
}

/// Exact payload to hand to the signing device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    pub document_id: String,
    /// Base64 payload
    pub payload: String,
    pub kind: SignatureKind,
}

/// Signed proof used to obtain a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedProof {
    pub pkcs7_b64: String,
    pub signature_hex: String,
}

/// Client company an operator acts for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub tin: String,
}

/// Pending document as presented to the batch orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDocument {
    pub id: String,
    pub external_id: String,
    pub number: Option<String>,
    pub date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub direction: Direction,
}

/// A company together with the documents still awaiting its signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignableCompany {
    pub company: Company,
    pub documents: Vec<PendingDocument>,
}
