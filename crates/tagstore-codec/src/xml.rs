//! XML format.
//!
//! On-disk layout: a `<TagStore>` root wrapping one `<Item>` element per
//! envelope, each with `<Tag>`, `<Type>`, `<Data>` (the JSON text of the
//! envelope) and `<Version>` children:
//!
//! ```text
//! <TagStore>
//!   <Item>
//!     <Tag>item1</Tag>
//!     <Type>i32</Type>
//!     <Version>1</Version>
//!     <Data>{"id":"obj_101","tag":"item1","type":"i32","version":1,"data":42}</Data>
//!   </Item>
//! </TagStore>
//! ```
//!
//! The element reader/writer below is deliberately minimal: elements,
//! text content, and entity escaping are all this format uses. An
//! unparsable document fails the whole import; a malformed `<Item>` is
//! skipped.

use serde_json::Value;
use tracing::warn;

use tagstore_types::{Envelope, TypeKey};

use crate::error::{CodecError, CodecResult};

const ROOT: &str = "TagStore";

/// Encode envelopes as an XML document.
pub fn encode(envelopes: &[Envelope]) -> CodecResult<Vec<u8>> {
    let mut out = String::new();
    out.push_str(&format!("<{ROOT}>\n"));
    for env in envelopes {
        let data_text =
            serde_json::to_string(env).map_err(|e| CodecError::Malformed(e.to_string()))?;
        out.push_str("  <Item>\n");
        out.push_str(&format!("    <Tag>{}</Tag>\n", escape(&env.tag)));
        out.push_str(&format!("    <Type>{}</Type>\n", escape(env.type_key.as_str())));
        out.push_str(&format!("    <Version>{}</Version>\n", env.version));
        out.push_str(&format!("    <Data>{}</Data>\n", escape(&data_text)));
        out.push_str("  </Item>\n");
    }
    out.push_str(&format!("</{ROOT}>\n"));
    Ok(out.into_bytes())
}

/// Decode an XML document into envelopes.
///
/// The `<Tag>` and `<Type>` children are authoritative; the `<Data>` text
/// supplies the id and payload. Items with missing or unparsable children
/// are skipped with a warning.
pub fn decode(bytes: &[u8]) -> CodecResult<Vec<Envelope>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| CodecError::Xml(format!("document is not UTF-8: {e}")))?;
    let root = parse_document(text)?;

    let mut envelopes = Vec::new();
    for (index, item) in root.children.iter().enumerate() {
        if item.name != "Item" {
            continue;
        }
        match decode_item(item) {
            Some(env) => envelopes.push(env),
            None => warn!(index, "skipping malformed XML item"),
        }
    }
    Ok(envelopes)
}

fn decode_item(item: &Element) -> Option<Envelope> {
    let tag = item.child_text("Tag")?;
    let type_key = item.child_text("Type")?;
    let data_text = item.child_text("Data")?;
    let parsed: Value = serde_json::from_str(&data_text).ok()?;

    // The Data text is normally full envelope JSON; tolerate a bare
    // payload written by hand.
    let (id, data, data_version) = match &parsed {
        Value::Object(obj) if obj.contains_key("data") => (
            obj.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
            obj.get("data").cloned().unwrap_or(Value::Null),
            obj.get("version").and_then(Value::as_u64).map(|v| v as u32),
        ),
        other => (String::new(), other.clone(), None),
    };

    let version = item
        .child_text("Version")
        .and_then(|v| v.trim().parse::<u32>().ok())
        .or(data_version)
        .unwrap_or(1);

    let mut env = Envelope::new(id, tag, TypeKey::new(type_key), data);
    env.version = version;
    Some(env)
}

// ---------------------------------------------------------------------------
// Minimal element tree reader
// ---------------------------------------------------------------------------

/// One parsed element: a name, child elements, and accumulated text.
struct Element {
    name: String,
    children: Vec<Element>,
    text: String,
}

impl Element {
    /// Text of the first child with the given name.
    fn child_text(&self, name: &str) -> Option<String> {
        self.children
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.text.trim().to_string())
    }
}

/// Parse a document: optional XML declaration, then exactly one root
/// element.
fn parse_document(input: &str) -> CodecResult<Element> {
    let mut pos = 0usize;
    skip_whitespace(input, &mut pos);
    if input[pos..].starts_with("<?") {
        match input[pos..].find("?>") {
            Some(end) => pos += end + 2,
            None => return Err(CodecError::Xml("unterminated XML declaration".into())),
        }
    }
    skip_whitespace(input, &mut pos);
    if pos >= input.len() {
        return Err(CodecError::Xml("missing root element".into()));
    }
    parse_element(input, &mut pos)
}

fn parse_element(input: &str, pos: &mut usize) -> CodecResult<Element> {
    if !input[*pos..].starts_with('<') {
        return Err(CodecError::Xml(format!("expected '<' at offset {pos}")));
    }
    *pos += 1;

    let name = read_name(input, pos)?;
    // Skip attributes; this format does not use them.
    let open_end = input[*pos..]
        .find('>')
        .ok_or_else(|| CodecError::Xml(format!("unterminated tag '{name}'")))?;
    let self_closing = input[*pos..*pos + open_end].trim_end().ends_with('/');
    *pos += open_end + 1;

    let mut element = Element {
        name,
        children: Vec::new(),
        text: String::new(),
    };
    if self_closing {
        return Ok(element);
    }

    loop {
        if *pos >= input.len() {
            return Err(CodecError::Xml(format!(
                "unexpected end of document inside '{}'",
                element.name
            )));
        }
        if input[*pos..].starts_with("</") {
            *pos += 2;
            let close = read_name(input, pos)?;
            if close != element.name {
                return Err(CodecError::Xml(format!(
                    "mismatched close tag: expected '{}', got '{close}'",
                    element.name
                )));
            }
            let end = input[*pos..]
                .find('>')
                .ok_or_else(|| CodecError::Xml(format!("unterminated close tag '{close}'")))?;
            *pos += end + 1;
            return Ok(element);
        }
        if input[*pos..].starts_with('<') {
            element.children.push(parse_element(input, pos)?);
        } else {
            let next = input[*pos..].find('<').unwrap_or(input.len() - *pos);
            element.text.push_str(&unescape(&input[*pos..*pos + next]));
            *pos += next;
        }
    }
}

fn read_name(input: &str, pos: &mut usize) -> CodecResult<String> {
    let rest = &input[*pos..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(rest.len());
    if end == 0 {
        return Err(CodecError::Xml(format!("empty element name at offset {pos}")));
    }
    *pos += end;
    Ok(rest[..end].to_string())
}

fn skip_whitespace(input: &str, pos: &mut usize) {
    while *pos < input.len() && input.as_bytes()[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
