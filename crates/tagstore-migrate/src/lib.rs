//! Versioned schema migrations for tagstore.
//!
//! Every import path runs an envelope's payload through
//! [`MigrationRegistry::upgrade_to_latest`] before a type-specific decoder
//! sees it. Migrations are hand-registered functions, one per
//! `(type, from_version)` step; there is no schema diffing or automatic
//! migration generation.

pub mod registry;

pub use registry::{MigrationFn, MigrationRegistry};
