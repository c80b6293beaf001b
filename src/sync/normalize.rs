//! Remote list item -> local document fields.
//!
//! The authority's list responses are loosely shaped, so every promoted field
//! is looked up through a list of candidate keys (dotted keys walk nested
//! objects). Missing or empty values become `None`.

use super::status::map_remote_status;
use crate::{store::DocumentUpsert, Direction, DocumentStatus, PipelineError, Result};
use chrono::{DateTime, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;

const DEFAULT_CURRENCY: &str = "UZS";

/// Items of a list response, wherever the envelope put them
pub fn extract_items(body: &Value) -> Vec<Value> {
    let inner = match body.get("data") {
        Some(data) if data.is_object() => data,
        _ => body,
    };
    [inner.get("data"), inner.get("documents"), inner.get("items"), body.get("data"), body.get("documents")]
        .into_iter()
        .flatten()
        .chain([inner, body])
        .find_map(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Normalize one list item into upsert fields
///
/// Fails for items without an identifier or with an unparsable date.
pub fn normalize_item(item: &Value, direction: Direction) -> Result<DocumentUpsert> {
    if !item.is_object() {
        return Err(PipelineError::Malformed(format!("list item is not an object: {item}")));
    }
    let external_id = text(item, &["doc_id", "id", "uuid"])
        .ok_or_else(|| PipelineError::Malformed("list item has no document id".to_string()))?;

    let status = first(item, &["doc_status", "status"])
        .map(map_remote_status)
        .unwrap_or(DocumentStatus::Pending);

    Ok(DocumentUpsert {
        status,
        direction,
        document_number: text(item, &["name", "number", "doc_number"]),
        document_date: date(item, &["doc_date", "docDate", "createdDate", "date"])?,
        amount: first(item, &["total_sum", "totalSum", "sum", "amount"]).and_then(sanitize_amount),
        currency: text(item, &["currency"]).unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        counterparty_name: text(
            item,
            &["partnerCompany", "partner_name", "partner.name", "counterparty.name"],
        ),
        counterparty_tin: text(
            item,
            &["partnerTin", "partner_tin", "partner.tin", "counterparty.tin"],
        ),
        contract_number: text(item, &["contract_number", "contract.number"]),
        contract_date: date(item, &["contract_date", "contract.date"])?,
        payload: item.clone(),
        external_id,
    })
}

/// Parse a remote amount, tolerating locale formatting
///
/// Whitespace and thousands separators are dropped and a decimal comma is
/// read as a point. Returns `None` when nothing numeric remains; the result
/// is rounded to two decimal places.
pub fn sanitize_amount(raw: &Value) -> Option<Decimal> {
    let raw = match raw {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    let mut cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '_')
        .collect();
    if cleaned.contains(',') {
        cleaned = if cleaned.contains('.') {
            cleaned.replace(',', "")
        } else if cleaned.matches(',').count() > 1 {
            cleaned.replace(',', "")
        } else {
            cleaned.replace(',', ".")
        };
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
        .map(|amount| amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// First candidate holding something other than null or an empty string
fn first<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| {
        let value = key.split('.').try_fold(item, |value, part| value.get(part))?;
        match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            other => Some(other),
        }
    })
}

fn text(item: &Value, keys: &[&str]) -> Option<String> {
    first(item, keys).and_then(|value| match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn date(item: &Value, keys: &[&str]) -> Result<Option<NaiveDate>> {
    let Some(raw) = text(item, keys) else {
        return Ok(None);
    };
    parse_date(&raw)
        .map(Some)
        .ok_or_else(|| PipelineError::Malformed(format!("unparsable date {raw:?}")))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.date_naive());
    }
    ["%Y-%m-%d", "%d.%m.%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        // "2026-03-01 10:15:00" and similar
        .or_else(|| raw.get(..10).and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()))
}
