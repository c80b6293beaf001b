use crate::DocumentStatus;
use serde_json::Value;

/// Normalize a remote status field into the canonical status
///
/// The authority sends either a numeric code (possibly as a string) or a
/// free-text, sometimes localized, label. Anything unrecognized is PENDING.
/// The numeric table is built from observed values and is not exhaustive.
pub fn map_remote_status(raw: &Value) -> DocumentStatus {
    match raw {
        Value::Number(n) => n.as_i64().map(from_code).unwrap_or(DocumentStatus::Pending),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(code) => from_code(code),
                Err(_) => from_text(s),
            }
        }
        _ => DocumentStatus::Pending,
    }
}

fn from_code(code: i64) -> DocumentStatus {
    match code {
        0 | 55 => DocumentStatus::Draft,
        3 | 8 | 110 | 140 | 160 => DocumentStatus::Signed,
        4 | 130 => DocumentStatus::Rejected,
        5 | 120 | 190 => DocumentStatus::Cancelled,
        _ => DocumentStatus::Pending,
    }
}

// Checked in order; the first matching keyword wins.
const KEYWORDS: &[(&[&str], DocumentStatus)] = &[
    (&["signed", "подпис"], DocumentStatus::Signed),
    (&["rejected", "отказ"], DocumentStatus::Rejected),
    (&["cancel", "deleted", "удален"], DocumentStatus::Cancelled),
    (&["draft", "чернов"], DocumentStatus::Draft),
];

fn from_text(text: &str) -> DocumentStatus {
    let text = text.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(words, _)| words.iter().any(|word| text.contains(word)))
        .map(|(_, status)| *status)
        .unwrap_or(DocumentStatus::Pending)
}
