//! Normalization of loosely shaped candidate records into `RankCandidate`
//!
//! Upstream similarity search (and older stored rows) use several names for
//! the same field. All aliases are resolved here, once, so scoring only ever
//! sees the canonical shape.

use crate::types::RankCandidate;
use serde_json::Value;

const ID_KEYS: &[&str] = &["id", "chunk_id", "chunkId", "uuid"];
const TEXT_KEYS: &[&str] = &["text", "chunk", "body", "content"];
const SIMILARITY_KEYS: &[&str] = &["similarity", "score", "sim"];
const VERIFIED_KEYS: &[&str] = &["verified_weight", "verifiedWeight"];
const MANUAL_KEYS: &[&str] = &["manual_academic_weight", "manualAcademicWeight", "academic_weight"];
const LANG_KEYS: &[&str] = &["lang_boost_da", "langBoostDa"];
const DOMAIN_KEYS: &[&str] = &["domain_boost_dk", "domainBoostDk"];
const FILE_KEYS: &[&str] = &["file_id", "fileId", "source_file_id"];

/// Map one raw record to a candidate. Returns `None` for non-objects and for
/// records without any text.
///
/// Records without an id are keyed by a hash of their text, so rows from
/// different sources only merge when they carry the same chunk.
pub fn normalize_candidate(raw: &Value) -> Option<RankCandidate> {
    let obj = raw.as_object()?;

    let text = first_present(obj, TEXT_KEYS)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|t| !t.trim().is_empty())?;

    let id = first_present(obj, ID_KEYS)
        .and_then(as_identifier)
        .unwrap_or_else(|| fallback_id(&text));

    let file_id = first_present(obj, FILE_KEYS).and_then(as_identifier);

    Some(RankCandidate {
        id,
        text,
        similarity: number_field(obj, SIMILARITY_KEYS),
        verified_weight: number_field(obj, VERIFIED_KEYS),
        manual_academic_weight: number_field(obj, MANUAL_KEYS),
        lang_boost_da: number_field(obj, LANG_KEYS),
        domain_boost_dk: number_field(obj, DOMAIN_KEYS),
        file_id,
    })
}

/// Normalize a whole batch, dropping unusable records
pub fn normalize_candidates(raw: &[Value]) -> Vec<RankCandidate> {
    let candidates: Vec<RankCandidate> = raw
        .iter()
        .filter_map(normalize_candidate)
        .collect();

    if candidates.len() < raw.len() {
        tracing::debug!(
            "Dropped {} of {} raw candidates without usable text",
            raw.len() - candidates.len(),
            raw.len()
        );
    }

    candidates
}

fn fallback_id(text: &str) -> String {
    let hash = blake3::hash(text.trim().as_bytes()).to_hex();
    format!("candidate-{}", &hash[..16])
}

fn first_present<'a>(
    obj: &'a serde_json::Map<String, Value>,
    keys: &[&str],
) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null())
}

fn as_identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> f64 {
    first_present(obj, keys).map(coerce_number).unwrap_or(0.0)
}

/// Numbers, numeric strings and booleans are accepted; anything else is 0.
pub fn coerce_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    };
    if n.is_finite() { n } else { 0.0 }
}
