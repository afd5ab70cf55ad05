//! Foundation types for tagstore.
//!
//! This crate provides the identifier and wire types shared by every other
//! tagstore crate.
//!
//! # Key Types
//!
//! - [`ItemId`] — Globally unique item identifier (UUID v4 when generated,
//!   arbitrary non-empty strings when imported)
//! - [`TypeKey`] — Stable, caller-registered name for a storable type
//! - [`Envelope`] — Canonical `{id, tag, type, version, data, schema?}`
//!   record shared by all four wire formats

pub mod envelope;
pub mod error;
pub mod id;
pub mod key;

pub use envelope::Envelope;
pub use error::TypeError;
pub use id::ItemId;
pub use key::TypeKey;
