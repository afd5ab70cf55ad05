//! CSV format.
//!
//! Header row `id,tag,type,data`, then one row per item. Fields are
//! double-quote-wrapped with internal quotes doubled (RFC-4180 style).
//! The `data` column carries the JSON text of the item's generic value
//! projection. The layout has no version column, so imported rows carry
//! version 1.

use serde_json::Value;
use tracing::{debug, warn};

use tagstore_types::{Envelope, TypeKey};

use crate::error::{CodecError, CodecResult};

const HEADER: &str = "id,tag,type,data";

/// Encode envelopes as CSV rows under the fixed header.
pub fn encode(envelopes: &[Envelope]) -> CodecResult<Vec<u8>> {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    for env in envelopes {
        let data_text = env.data.to_string();
        out.push_str(&quote(&env.id));
        out.push(',');
        out.push_str(&quote(&env.tag));
        out.push(',');
        out.push_str(&quote(env.type_key.as_str()));
        out.push(',');
        out.push_str(&quote(&data_text));
        out.push('\n');
    }
    Ok(out.into_bytes())
}

/// Decode CSV rows back into envelopes.
///
/// A header other than `id,tag,type,data` is a hard error. Rows with the
/// wrong field count are skipped with a warning.
pub fn decode(bytes: &[u8]) -> CodecResult<Vec<Envelope>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| CodecError::Malformed(format!("document is not UTF-8: {e}")))?;
    let records = parse_records(text);

    let mut rows = records.into_iter();
    let header = rows.next().unwrap_or_default();
    if header.join(",") != HEADER {
        return Err(CodecError::CsvHeader {
            expected: HEADER.to_string(),
            actual: header.join(","),
        });
    }

    let mut envelopes = Vec::new();
    for (index, row) in rows.enumerate() {
        if row.len() == 1 && row[0].is_empty() {
            continue; // trailing blank line
        }
        if row.len() != 4 {
            warn!(row = index + 1, fields = row.len(), "skipping malformed CSV row");
            continue;
        }
        let data = match serde_json::from_str::<Value>(&row[3]) {
            Ok(v) => v,
            Err(_) => {
                // A previously escaped plain string; keep it as text.
                debug!(row = index + 1, "data column is not JSON; keeping raw text");
                Value::String(row[3].clone())
            }
        };
        envelopes.push(Envelope::new(
            row[0].clone(),
            row[1].clone(),
            TypeKey::new(row[2].as_str()),
            data,
        ));
    }
    Ok(envelopes)
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Split the document into records of fields, honoring quoted fields
/// (which may contain commas, doubled quotes, and newlines).
fn parse_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            other => field.push(other),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}
