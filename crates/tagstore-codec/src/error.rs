use thiserror::Error;

/// Errors produced by the codec layer.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("csv header mismatch: expected '{expected}', got '{actual}'")]
    CsvHeader { expected: String, actual: String },

    #[error("xml parse error: {0}")]
    Xml(String),

    #[error("atomic write to {path} failed: {reason}")]
    AtomicWrite { path: String, reason: String },
}

/// Convenience alias for codec results.
pub type CodecResult<T> = Result<T, CodecError>;
