use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Globally unique identifier for one stored item, independent of its tag.
///
/// Freshly created items get a UUID v4. Imported envelopes may carry any
/// non-empty id string (files written by older builds used other shapes),
/// so the id is kept as an opaque string rather than a parsed UUID.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Generate a fresh random id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create from an existing id string. Fails on the empty string.
    pub fn parse(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(TypeError::EmptyId);
        }
        Ok(Self(raw))
    }

    /// Resolve an id coming off the wire: reuse it when present and
    /// non-empty, otherwise generate a fresh one.
    pub fn resolve(raw: &str) -> Self {
        if raw.is_empty() {
            Self::generate()
        } else {
            Self(raw.to_string())
        }
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short representation (roughly the first 8 bytes, never splitting a
    /// character; imported ids are arbitrary UTF-8).
    pub fn short(&self) -> &str {
        let mut end = self.0.len().min(8);
        while !self.0.is_char_boundary(end) {
            end -= 1;
        }
        &self.0[..end]
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.short())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
