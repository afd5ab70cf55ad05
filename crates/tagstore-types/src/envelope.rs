use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::TypeKey;

fn default_version() -> u32 {
    1
}

/// Canonical wire record shared by all four codecs.
///
/// Field names match the on-disk JSON layout: `id`, `tag`, `type`,
/// `version`, `data`, and an optional `schema`. `id` may be empty on the
/// wire (the importer then generates one); `version` defaults to 1 when
/// absent. `data` holds the type-specific payload as a structured value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: String,
    pub tag: String,
    #[serde(rename = "type")]
    pub type_key: TypeKey,
    #[serde(default = "default_version")]
    pub version: u32,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl Envelope {
    /// Build an envelope with no schema and the default version.
    pub fn new(id: impl Into<String>, tag: impl Into<String>, type_key: TypeKey, data: Value) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
            type_key,
            version: 1,
            data,
            schema: None,
        }
    }
}
