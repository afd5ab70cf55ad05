//! Length-prefixed binary format.
//!
//! On-disk layout, one record per envelope, no file header:
//!
//! ```text
//! [4 bytes: type key length (little-endian u32)]
//! [N bytes: type key (UTF-8)]
//! [4 bytes: tag length (little-endian u32)]
//! [N bytes: tag (UTF-8)]
//! [4 bytes: payload length (little-endian u32)]
//! [N bytes: payload (UTF-8 JSON text of the envelope)]
//! ```
//!
//! Reading stops cleanly at end-of-stream or on any short read; a record
//! whose payload fails to parse is skipped.

use tracing::warn;

use tagstore_types::{Envelope, TypeKey};

use crate::error::{CodecError, CodecResult};

/// Encode envelopes as a flat sequence of length-prefixed records.
pub fn encode(envelopes: &[Envelope]) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    for env in envelopes {
        let payload =
            serde_json::to_vec(env).map_err(|e| CodecError::Malformed(e.to_string()))?;
        write_field(&mut out, env.type_key.as_str().as_bytes());
        write_field(&mut out, env.tag.as_bytes());
        write_field(&mut out, &payload);
    }
    Ok(out)
}

/// Decode a flat record sequence back into envelopes.
///
/// The frame's tag and type key are authoritative; a truncated trailing
/// record ends the scan without error.
pub fn decode(bytes: &[u8]) -> CodecResult<Vec<Envelope>> {
    let mut envelopes = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let Some((type_bytes, next)) = read_field(bytes, offset) else {
            warn!(offset, "truncated binary record; stopping scan");
            break;
        };
        let Some((tag_bytes, next)) = read_field(bytes, next) else {
            warn!(offset, "truncated binary record; stopping scan");
            break;
        };
        let Some((payload, next)) = read_field(bytes, next) else {
            warn!(offset, "truncated binary record; stopping scan");
            break;
        };

        match parse_record(type_bytes, tag_bytes, payload) {
            Ok(env) => envelopes.push(env),
            Err(e) => warn!(offset, error = %e, "skipping malformed binary record"),
        }
        offset = next;
    }
    Ok(envelopes)
}

fn parse_record(type_bytes: &[u8], tag_bytes: &[u8], payload: &[u8]) -> CodecResult<Envelope> {
    let type_key = std::str::from_utf8(type_bytes)
        .map_err(|e| CodecError::Malformed(format!("type key is not UTF-8: {e}")))?;
    let tag = std::str::from_utf8(tag_bytes)
        .map_err(|e| CodecError::Malformed(format!("tag is not UTF-8: {e}")))?;
    let mut env: Envelope =
        serde_json::from_slice(payload).map_err(|e| CodecError::Malformed(e.to_string()))?;
    env.type_key = TypeKey::new(type_key);
    env.tag = tag.to_string();
    Ok(env)
}

fn write_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_le_bytes());
    out.extend_from_slice(field);
}

/// Read one `[u32 LE length][bytes]` field. Returns `None` on short read.
fn read_field(bytes: &[u8], offset: usize) -> Option<(&[u8], usize)> {
    let len_end = offset.checked_add(4)?;
    if len_end > bytes.len() {
        return None;
    }
    let len = u32::from_le_bytes(bytes[offset..len_end].try_into().ok()?) as usize;
    let field_end = len_end.checked_add(len)?;
    if field_end > bytes.len() {
        return None;
    }
    Some((&bytes[len_end..field_end], field_end))
}
