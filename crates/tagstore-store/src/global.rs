//! Optional process-wide store.
//!
//! Most code should construct and pass its own [`Store`]; this accessor
//! exists for composition roots that want one shared instance without
//! threading it through every call site.

use std::sync::{Arc, OnceLock};

use crate::store::Store;

static GLOBAL: OnceLock<Arc<Store>> = OnceLock::new();

/// The process-wide store, created on first access.
pub fn global() -> &'static Arc<Store> {
    GLOBAL.get_or_init(|| Arc::new(Store::new()))
}
