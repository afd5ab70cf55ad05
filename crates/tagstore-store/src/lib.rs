//! Type-erased object storage with undo/redo and versioned persistence.
//!
//! The store keeps values of arbitrary types in one tag-keyed map, behind
//! the object-safe [`StoredItem`] trait. Around that core it layers a
//! bounded undo/redo history, lazy per-type registration, schema migration
//! on import, and synchronous plus fire-and-forget import/export in four
//! formats (JSON, binary, XML, CSV).
//!
//! # Key Types
//!
//! - [`Store`] — the store itself; share it across threads via `Arc`.
//! - [`Storable`] — contract a value type implements to live in the store.
//! - [`ItemCell`] — generic adapter wrapping one value as a stored item.
//! - [`StoreError`] / [`StoreResult`] — hard-failure surface.
//!
//! # Design Rules
//!
//! - One mutex guards all store state; synchronous import/export holds it
//!   across the file I/O so each file operation is one atomic transition.
//! - Read misses are soft (`None` plus a log line); the `with_item*`
//!   accessors and `remove` are the hard-failing surface.
//! - Every mutation snapshots for undo and invalidates redo, except the
//!   `with_item_mut` escape hatch.
//! - Types register themselves on first `add`; imports skip entries whose
//!   type was never registered in this process.

pub mod background;
pub mod error;
pub mod global;
pub mod item;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use global::global;
pub use item::{ItemCell, Storable, StoredItem};
pub use store::Store;

pub use tagstore_migrate::{MigrationFn, MigrationRegistry};
pub use tagstore_types::{Envelope, ItemId, TypeKey};
