use thiserror::Error;

use tagstore_codec::CodecError;
use tagstore_types::TypeKey;

/// Errors surfaced to callers of the store.
///
/// Soft conditions (unknown type during bulk import, undo with empty
/// history, `get` misses) are logged and absorbed, never returned here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no item under tag '{tag}'")]
    NotFound { tag: String },

    #[error("type mismatch for tag '{tag}': stored type is '{actual}'")]
    TypeMismatch { tag: String, actual: TypeKey },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
