use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("item id must not be empty")]
    EmptyId,

    #[error("type key must not be empty")]
    EmptyTypeKey,
}
