//! Wire codecs for tagstore.
//!
//! Four independent encode/decode pairs share one logical record, the
//! [`Envelope`](tagstore_types::Envelope):
//!
//! - [`json`] -- an array of envelopes (or an object with an `items` array)
//! - [`binary`] -- flat length-prefixed records framing envelope JSON text
//! - [`xml`] -- `<TagStore><Item>...</Item></TagStore>` documents
//! - [`csv`] -- four-column `id,tag,type,data` rows with RFC-4180 quoting
//!
//! # Design Rules
//!
//! 1. Decoders are lenient per entry: a malformed entry is logged and
//!    skipped, never aborting the whole file scan.
//! 2. Structural failures (unreadable document, wrong CSV header) are hard
//!    errors to the caller.
//! 3. Encoders produce a complete byte buffer; [`atomic::write_atomically`]
//!    publishes it so readers never observe a partial file.
//! 4. Codecs know nothing about concrete item types or the store.

pub mod atomic;
pub mod binary;
pub mod csv;
pub mod error;
pub mod json;
pub mod xml;

pub use atomic::write_atomically;
pub use error::{CodecError, CodecResult};
