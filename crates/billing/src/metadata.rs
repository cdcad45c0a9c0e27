//! Versioned project-details snapshot carried in Stripe metadata
//!
//! Stripe limits metadata values to 500 characters, so the serialized
//! envelope is split across `project_details_0..n` keys with the chunk count
//! in `project_details_chunks`. Parsing reassembles the chunks and validates
//! the version; anything unreadable is returned raw for manual recovery.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::MaintenanceBilling;
use crate::client::CustomerContact;
use crate::error::{BillingError, BillingResult};

pub const ENVELOPE_VERSION: u32 = 1;

/// Maximum characters per metadata value
pub const CHUNK_LEN: usize = 500;

/// Stripe allows 50 metadata keys per object. The plan, rush and chunk-count
/// keys plus the customer's company and source take the other five.
pub const MAX_CHUNKS: usize = 45;

pub const CHUNK_COUNT_KEY: &str = "project_details_chunks";
const CHUNK_KEY_PREFIX: &str = "project_details_";

/// Snapshot of what the customer asked for at checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetailsEnvelope {
    pub version: u32,
    pub plan: String,
    pub rush_delivery: bool,
    #[serde(default)]
    pub add_ons: Vec<String>,
    #[serde(default)]
    pub maintenance: Option<MaintenanceBilling>,
    pub contact: CustomerContact,
    /// Free-form project details from the start form
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ProjectDetailsEnvelope {
    /// Split into metadata entries, alongside the plain plan/rush keys.
    /// Fails when the snapshot would need more than `MAX_CHUNKS` keys.
    pub fn to_metadata(&self) -> BillingResult<HashMap<String, String>> {
        let json = serde_json::to_string(self)
            .map_err(|e| BillingError::Internal(format!("project details: {}", e)))?;
        let chunks = chunk_str(&json, CHUNK_LEN);
        if chunks.len() > MAX_CHUNKS {
            tracing::warn!(
                chunks = chunks.len(),
                max = MAX_CHUNKS,
                "Project details exceed Stripe metadata capacity"
            );
            return Err(BillingError::InvalidInput(
                "Project details are too long".to_string(),
            ));
        }

        let mut metadata = HashMap::new();
        metadata.insert("plan".to_string(), self.plan.clone());
        metadata.insert("rush_delivery".to_string(), self.rush_delivery.to_string());
        metadata.insert(CHUNK_COUNT_KEY.to_string(), chunks.len().to_string());
        for (i, chunk) in chunks.into_iter().enumerate() {
            metadata.insert(format!("{}{}", CHUNK_KEY_PREFIX, i), chunk);
        }
        Ok(metadata)
    }
}

/// Splits on character boundaries so multi-byte text is never cut
fn chunk_str(s: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// Result of reading the snapshot back from a completed session
#[derive(Debug, Clone, PartialEq)]
pub enum DetailsParse {
    Parsed(ProjectDetailsEnvelope),
    /// Session carried no snapshot at all
    Missing,
    /// Snapshot present but unreadable; `raw` is kept for recovery
    Invalid { raw: String, reason: String },
}

impl DetailsParse {
    pub fn envelope(&self) -> Option<&ProjectDetailsEnvelope> {
        match self {
            DetailsParse::Parsed(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn raw(&self) -> Option<&str> {
        match self {
            DetailsParse::Invalid { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Reassemble and validate the snapshot from session metadata
pub fn parse_metadata(metadata: &HashMap<String, String>) -> DetailsParse {
    let Some(count) = metadata.get(CHUNK_COUNT_KEY) else {
        return DetailsParse::Missing;
    };

    let count: usize = match count.parse() {
        Ok(n) => n,
        Err(_) => {
            return DetailsParse::Invalid {
                raw: count.clone(),
                reason: format!("{} is not a number", CHUNK_COUNT_KEY),
            }
        }
    };

    let mut raw = String::new();
    let mut missing = Vec::new();
    for i in 0..count {
        match metadata.get(&format!("{}{}", CHUNK_KEY_PREFIX, i)) {
            Some(chunk) => raw.push_str(chunk),
            None => missing.push(i),
        }
    }

    if !missing.is_empty() {
        return DetailsParse::Invalid {
            raw,
            reason: format!("missing chunks {:?}", missing),
        };
    }

    match serde_json::from_str::<ProjectDetailsEnvelope>(&raw) {
        Ok(envelope) if envelope.version == ENVELOPE_VERSION => DetailsParse::Parsed(envelope),
        Ok(envelope) => DetailsParse::Invalid {
            raw,
            reason: format!("unsupported version {}", envelope.version),
        },
        Err(e) => DetailsParse::Invalid {
            raw,
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn envelope(details: serde_json::Value) -> ProjectDetailsEnvelope {
        ProjectDetailsEnvelope {
            version: ENVELOPE_VERSION,
            plan: "pro".to_string(),
            rush_delivery: true,
            add_ons: vec!["googleBusiness".to_string()],
            maintenance: Some(MaintenanceBilling::Annual),
            contact: CustomerContact {
                name: "Ada Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                company: None,
                phone: None,
            },
            details,
        }
    }

    #[test]
    fn test_long_details_are_chunked_and_reassembled() {
        let story = "Our bakery has served the neighbourhood since 1952. ".repeat(40);
        let original = envelope(serde_json::json!({ "story": story, "café": "crème brûlée" }));

        let metadata = original.to_metadata().unwrap();
        let chunks: usize = metadata[CHUNK_COUNT_KEY].parse().unwrap();
        assert!(chunks > 1);
        for i in 0..chunks {
            assert!(metadata[&format!("project_details_{}", i)].chars().count() <= CHUNK_LEN);
        }
        assert_eq!(metadata["plan"], "pro");

        assert_eq!(parse_metadata(&metadata), DetailsParse::Parsed(original));
    }

    #[test]
    fn test_details_at_capacity_fit_stripe_key_limit() {
        let mut fits = envelope(serde_json::json!({ "description": "" }));
        let base = serde_json::to_string(&fits).unwrap().chars().count();
        let filler = "x".repeat(MAX_CHUNKS * CHUNK_LEN - base);
        fits.details = serde_json::json!({ "description": filler });

        let metadata = fits.to_metadata().unwrap();
        assert_eq!(metadata[CHUNK_COUNT_KEY], MAX_CHUNKS.to_string());
        // company + source are added on the customer copy
        assert!(metadata.len() + 2 <= 50);
    }

    #[test]
    fn test_oversized_details_are_rejected() {
        let huge = envelope(serde_json::json!({ "description": "x".repeat(30_000) }));
        let err = huge.to_metadata().unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(msg) if msg.contains("too long")));
    }

    #[test]
    fn test_no_snapshot_is_missing() {
        let metadata = HashMap::from([("plan".to_string(), "pro".to_string())]);
        assert_eq!(parse_metadata(&metadata), DetailsParse::Missing);
    }

    #[test]
    fn test_garbage_is_kept_raw() {
        let metadata = HashMap::from([
            (CHUNK_COUNT_KEY.to_string(), "1".to_string()),
            ("project_details_0".to_string(), "{not json".to_string()),
        ]);
        let parsed = parse_metadata(&metadata);
        assert_eq!(parsed.raw(), Some("{not json"));
        assert!(parsed.envelope().is_none());
    }

    #[test]
    fn test_unknown_version_is_invalid() {
        let mut future = envelope(serde_json::Value::Null);
        future.version = 2;
        match parse_metadata(&future.to_metadata().unwrap()) {
            DetailsParse::Invalid { reason, .. } => assert!(reason.contains("version 2")),
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_chunk_is_invalid() {
        let mut metadata = envelope(serde_json::Value::Null).to_metadata().unwrap();
        metadata.insert(CHUNK_COUNT_KEY.to_string(), "3".to_string());
        match parse_metadata(&metadata) {
            DetailsParse::Invalid { reason, .. } => assert!(reason.contains("missing chunks")),
            other => panic!("expected invalid, got {:?}", other),
        }
    }
}
