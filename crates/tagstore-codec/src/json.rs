//! Structured-tree (JSON) format: an array of envelopes.
//!
//! A file may alternatively be an object carrying the array under an
//! `items` key. Entries missing `tag`, `type`, or `data` are skipped with
//! a warning; a single bad entry never aborts the import.

use serde_json::Value;
use tracing::warn;

use tagstore_types::Envelope;

use crate::error::{CodecError, CodecResult};

/// Encode envelopes as a pretty-printed JSON array.
pub fn encode(envelopes: &[Envelope]) -> CodecResult<Vec<u8>> {
    serde_json::to_vec_pretty(envelopes).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decode a JSON document into envelopes.
///
/// Accepts either a top-level array or an object with an `items` array.
/// Malformed entries are skipped; an unparsable document is a hard error.
pub fn decode(bytes: &[u8]) -> CodecResult<Vec<Envelope>> {
    let root: Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let entries = match &root {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(obj) => match obj.get("items").and_then(Value::as_array) {
            Some(entries) => entries.as_slice(),
            None => {
                return Err(CodecError::Malformed(
                    "expected an array or an object with an 'items' array".into(),
                ))
            }
        },
        _ => {
            return Err(CodecError::Malformed(
                "expected an array or an object with an 'items' array".into(),
            ))
        }
    };

    let mut envelopes = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<Envelope>(entry.clone()) {
            Ok(env) => envelopes.push(env),
            Err(e) => {
                warn!(index, error = %e, "skipping malformed JSON entry");
            }
        }
    }
    Ok(envelopes)
}
