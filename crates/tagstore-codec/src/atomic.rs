//! Atomic file publication.
//!
//! Every exporter builds its complete byte buffer in memory and then calls
//! [`write_atomically`], so a reader either sees the old file or the new
//! one, never a torn write.

use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{CodecError, CodecResult};

/// Write `bytes` to `path` all-or-nothing: the data lands in a temporary
/// file in the target's directory and is renamed over the target.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> CodecResult<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| CodecError::AtomicWrite {
        path: path.display().to_string(),
        reason: e.error.to_string(),
    })?;
    debug!(path = %path.display(), len = bytes.len(), "atomic write");
    Ok(())
}
