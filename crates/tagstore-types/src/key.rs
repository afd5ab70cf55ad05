use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Stable registration name for a storable type.
///
/// Serialized files carry this key, so it must be explicit and portable
/// across builds and compilers -- never derived from runtime type names.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeKey(String);

impl TypeKey {
    /// Create a type key from its registered name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Create a type key, rejecting the empty string.
    pub fn checked(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::EmptyTypeKey);
        }
        Ok(Self(name))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
