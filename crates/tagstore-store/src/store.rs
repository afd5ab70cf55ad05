//! The store: a tag-keyed map of type-erased items with undo/redo,
//! lazy type registration, schema migration on import, and four-format
//! import/export.
//!
//! One mutex guards every field. All synchronous operations hold it for
//! their full duration, including the file I/O of import/export -- a known
//! scalability limitation kept by design so a whole-file import is one
//! atomic state transition.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, info, warn};

use tagstore_codec::{binary, csv, json, write_atomically, xml};
use tagstore_migrate::{MigrationFn, MigrationRegistry};
use tagstore_types::{Envelope, ItemId, TypeKey};

use crate::error::{StoreError, StoreResult};
use crate::item::{ItemCell, Storable, StoredItem};

/// Bounded window of undo snapshots.
const MAX_UNDO_HISTORY: usize = 50;
/// Bounded window of redo snapshots.
const MAX_REDO_HISTORY: usize = 50;

/// One full snapshot of the live tag map.
type State = HashMap<String, Box<dyn StoredItem>>;

type DecodeFn = Arc<dyn Fn(&Envelope) -> Box<dyn StoredItem> + Send + Sync>;
type SchemaFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Per-type registration: how to decode an envelope into an item, and
/// optionally how to produce the type's schema.
struct TypeRegistration {
    decode: DecodeFn,
    schema: Option<SchemaFn>,
}

struct Inner {
    /// Main storage: tag -> item. Tags are unique keys; the store
    /// exclusively owns every item reachable from here.
    items: State,
    /// Secondary lookup: id -> tag. Always consistent with `items`.
    id_index: HashMap<ItemId, String>,
    /// Live item count per type; the registration is evicted at zero.
    type_usage: HashMap<TypeKey, usize>,
    registry: HashMap<TypeKey, TypeRegistration>,
    undo_history: VecDeque<State>,
    redo_queue: VecDeque<State>,
    migrations: MigrationRegistry,
}

/// Type-erased object store with undo/redo and versioned import/export.
///
/// Values of arbitrary (but fixed, per-slot) type are inserted under
/// string tags; the store provides uniform serialization, schema
/// evolution, and a bounded undo/redo log across the heterogeneous
/// collection. Safe to share across threads behind an `Arc`.
pub struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                id_index: HashMap::new(),
                type_usage: HashMap::new(),
                registry: HashMap::new(),
                undo_history: VecDeque::new(),
                redo_queue: VecDeque::new(),
                migrations: MigrationRegistry::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Insert a value under a tag, returning the new item's id.
    ///
    /// Registers the type's decoder and schema on first use. Overwriting
    /// an existing tag releases the replaced item's id-index entry and
    /// usage count. Snapshots for undo and clears the redo queue.
    pub fn add<T: Storable>(&self, value: T, tag: &str) -> ItemId {
        let mut inner = self.lock();
        inner.ensure_registered::<T>();
        inner.save_state();
        let item = ItemCell::new(value, tag);
        let id = item.id().clone();
        inner.insert_item(Box::new(item));
        debug!(tag, id = %id.short(), type_key = T::TYPE_KEY, "added item");
        id
    }

    /// Apply a mutator to the value stored under `tag`.
    ///
    /// Returns `false` (logged, no snapshot) when the tag is absent or the
    /// stored type is not `T`.
    pub fn modify<T: Storable>(&self, tag: &str, f: impl FnOnce(&mut T)) -> bool {
        let mut inner = self.lock();
        match inner.items.get(tag) {
            None => {
                warn!(tag, "modify: tag not found");
                return false;
            }
            Some(item) if item.as_any().downcast_ref::<ItemCell<T>>().is_none() => {
                warn!(tag, stored = %item.type_key(), requested = T::TYPE_KEY, "modify: type mismatch");
                return false;
            }
            Some(_) => {}
        }
        inner.save_state();
        let cell = inner
            .items
            .get_mut(tag)
            .and_then(|item| item.as_any_mut().downcast_mut::<ItemCell<T>>())
            .expect("presence and type checked above");
        f(cell.value_mut());
        true
    }

    /// Copy out the value stored under `tag`.
    ///
    /// Never errors: a missing tag or a type mismatch is logged and yields
    /// `None`.
    pub fn get<T: Storable>(&self, tag: &str) -> Option<T> {
        let inner = self.lock();
        let Some(item) = inner.items.get(tag) else {
            warn!(tag, "get: tag not found");
            return None;
        };
        match item.as_any().downcast_ref::<ItemCell<T>>() {
            Some(cell) => Some(cell.value().clone()),
            None => {
                warn!(tag, stored = %item.type_key(), requested = T::TYPE_KEY, "get: type mismatch");
                None
            }
        }
    }

    /// Run a closure against a shared reference to the stored value.
    ///
    /// Hard-failing counterpart of [`Store::get`]: a missing tag or a type
    /// mismatch is an explicit error. References cannot escape the store's
    /// lock, so access is closure-scoped.
    pub fn with_item<T: Storable, R>(
        &self,
        tag: &str,
        f: impl FnOnce(&T) -> R,
    ) -> StoreResult<R> {
        let inner = self.lock();
        let item = inner.items.get(tag).ok_or_else(|| StoreError::NotFound {
            tag: tag.to_string(),
        })?;
        let cell = item
            .as_any()
            .downcast_ref::<ItemCell<T>>()
            .ok_or_else(|| StoreError::TypeMismatch {
                tag: tag.to_string(),
                actual: item.type_key().clone(),
            })?;
        Ok(f(cell.value()))
    }

    /// Run a closure against a mutable reference to the stored value.
    ///
    /// Like the raw mutable accessor it replaces, this bypasses the undo
    /// log: no snapshot is taken.
    pub fn with_item_mut<T: Storable, R>(
        &self,
        tag: &str,
        f: impl FnOnce(&mut T) -> R,
    ) -> StoreResult<R> {
        let mut inner = self.lock();
        let item = inner.items.get_mut(tag).ok_or_else(|| StoreError::NotFound {
            tag: tag.to_string(),
        })?;
        let actual = item.type_key().clone();
        let cell = item
            .as_any_mut()
            .downcast_mut::<ItemCell<T>>()
            .ok_or(StoreError::TypeMismatch {
                tag: tag.to_string(),
                actual,
            })?;
        Ok(f(cell.value_mut()))
    }

    /// Remove the item stored under `tag`. Returns whether one existed.
    ///
    /// An empty tag is an `InvalidArgument` error. Removing the last item
    /// of a type evicts the type's registration.
    pub fn remove(&self, tag: &str) -> StoreResult<bool> {
        if tag.is_empty() {
            return Err(StoreError::InvalidArgument(
                "tag must not be empty".to_string(),
            ));
        }
        let mut inner = self.lock();
        if !inner.items.contains_key(tag) {
            warn!(tag, "remove: tag not found");
            return Ok(false);
        }
        inner.save_state();
        let item = inner.items.remove(tag).expect("presence checked above");
        inner.id_index.remove(item.id());
        inner.release_type(item.type_key().clone());
        debug!(tag, "removed item");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Undo / redo
    // -----------------------------------------------------------------------

    /// Restore the most recent undo snapshot. Returns `false` (logged)
    /// when there is no history.
    pub fn undo(&self) -> bool {
        let mut inner = self.lock();
        let Some(previous) = inner.undo_history.pop_back() else {
            info!("undo: no history");
            return false;
        };
        let current = inner.items.clone();
        inner.redo_queue.push_front(current);
        if inner.redo_queue.len() > MAX_REDO_HISTORY {
            inner.redo_queue.pop_back();
        }
        inner.restore(previous);
        true
    }

    /// Step forward again after an undo. Returns `false` (logged) when the
    /// redo queue is empty. Any new mutation clears the queue, so redo is
    /// only valid immediately after undos.
    pub fn redo(&self) -> bool {
        let mut inner = self.lock();
        let Some(next) = inner.redo_queue.pop_front() else {
            info!("redo: nothing to redo");
            return false;
        };
        let current = inner.items.clone();
        inner.undo_history.push_back(current);
        if inner.undo_history.len() > MAX_UNDO_HISTORY {
            inner.undo_history.pop_front();
        }
        inner.restore(next);
        true
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Whether an item exists under `tag`.
    pub fn has_item(&self, tag: &str) -> bool {
        self.lock().items.contains_key(tag)
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns `true` if the store holds no items.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// All tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let inner = self.lock();
        let mut tags: Vec<String> = inner.items.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// All `(id, tag)` pairs, sorted by tag. Served from the id index.
    pub fn ids(&self) -> Vec<(ItemId, String)> {
        let inner = self.lock();
        let mut pairs: Vec<(ItemId, String)> = inner
            .id_index
            .iter()
            .map(|(id, tag)| (id.clone(), tag.clone()))
            .collect();
        pairs.sort_by(|(_, a), (_, b)| a.cmp(b));
        pairs
    }

    /// Tag of the item with the given id, if any. Served from the id
    /// index.
    pub fn tag_for_id(&self, id: &ItemId) -> Option<String> {
        self.lock().id_index.get(id).cloned()
    }

    /// Id of the item under `tag`, if any.
    pub fn item_id(&self, tag: &str) -> Option<ItemId> {
        self.lock().items.get(tag).map(|item| item.id().clone())
    }

    /// The subset of `tags` actually present, sorted.
    pub fn filter_by_tags(&self, tags: &[String]) -> Vec<String> {
        let inner = self.lock();
        let mut found: Vec<String> = tags
            .iter()
            .filter(|t| inner.items.contains_key(t.as_str()))
            .cloned()
            .collect();
        found.sort();
        found
    }

    /// Type keys with a live registration, sorted.
    pub fn registered_types(&self) -> Vec<TypeKey> {
        let inner = self.lock();
        let mut keys: Vec<TypeKey> = inner.registry.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Distinct type keys of live items, sorted.
    pub fn type_names(&self) -> Vec<TypeKey> {
        let inner = self.lock();
        let mut keys: Vec<TypeKey> = inner.type_usage.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove all items, registrations, and history.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.items.clear();
        inner.id_index.clear();
        inner.type_usage.clear();
        inner.registry.clear();
        inner.undo_history.clear();
        inner.redo_queue.clear();
    }

    // -----------------------------------------------------------------------
    // Migrations
    // -----------------------------------------------------------------------

    /// Record the latest schema version for a type.
    pub fn register_version(&self, type_key: TypeKey, latest: u32) {
        self.lock().migrations.register_version(type_key, latest);
    }

    /// Register one upgrade step for a type, keyed by the version it
    /// upgrades from.
    pub fn register_migration(&self, type_key: TypeKey, from_version: u32, f: MigrationFn) {
        self.lock()
            .migrations
            .register_migration(type_key, from_version, f);
    }

    /// Copy of the in-memory migration log.
    pub fn migration_log(&self) -> Vec<String> {
        self.lock().migrations.log().to_vec()
    }

    /// Clear the migration log.
    pub fn clear_migration_log(&self) {
        self.lock().migrations.clear_log();
    }

    // -----------------------------------------------------------------------
    // Import / export
    // -----------------------------------------------------------------------

    /// Export all items as a JSON array of envelopes.
    pub fn export_json(&self, path: &Path) -> StoreResult<()> {
        let inner = self.lock();
        let envelopes = inner.collect_envelopes();
        let bytes = json::encode(&envelopes)?;
        write_atomically(path, &bytes)?;
        info!(path = %path.display(), count = envelopes.len(), "exported JSON");
        Ok(())
    }

    /// Import items from a JSON file. Returns the number of items that
    /// landed; bad entries are skipped, never aborting the scan.
    pub fn import_json(&self, path: &Path) -> StoreResult<usize> {
        let mut inner = self.lock();
        let bytes = std::fs::read(path)?;
        let envelopes = json::decode(&bytes)?;
        let count = inner.apply_envelopes(envelopes);
        info!(path = %path.display(), count, "imported JSON");
        Ok(count)
    }

    /// Import one `(type, tag)` entry from a JSON file. `Ok(None)` when no
    /// matching entry exists.
    pub fn import_single_json(
        &self,
        path: &Path,
        type_key: &TypeKey,
        tag: &str,
    ) -> StoreResult<Option<ItemId>> {
        let mut inner = self.lock();
        let bytes = std::fs::read(path)?;
        let envelopes = json::decode(&bytes)?;
        Ok(inner.apply_single(envelopes, type_key, tag))
    }

    /// Export all items as length-prefixed binary records.
    pub fn export_binary(&self, path: &Path) -> StoreResult<()> {
        let inner = self.lock();
        let envelopes = inner.collect_envelopes();
        let bytes = binary::encode(&envelopes)?;
        write_atomically(path, &bytes)?;
        info!(path = %path.display(), count = envelopes.len(), "exported binary");
        Ok(())
    }

    /// Import items from a binary file.
    pub fn import_binary(&self, path: &Path) -> StoreResult<usize> {
        let mut inner = self.lock();
        let bytes = std::fs::read(path)?;
        let envelopes = binary::decode(&bytes)?;
        let count = inner.apply_envelopes(envelopes);
        info!(path = %path.display(), count, "imported binary");
        Ok(count)
    }

    /// Import one `(type, tag)` entry from a binary file.
    pub fn import_single_binary(
        &self,
        path: &Path,
        type_key: &TypeKey,
        tag: &str,
    ) -> StoreResult<Option<ItemId>> {
        let mut inner = self.lock();
        let bytes = std::fs::read(path)?;
        let envelopes = binary::decode(&bytes)?;
        Ok(inner.apply_single(envelopes, type_key, tag))
    }

    /// Export all items as an XML document.
    pub fn export_xml(&self, path: &Path) -> StoreResult<()> {
        let inner = self.lock();
        let envelopes = inner.collect_envelopes();
        let bytes = xml::encode(&envelopes)?;
        write_atomically(path, &bytes)?;
        info!(path = %path.display(), count = envelopes.len(), "exported XML");
        Ok(())
    }

    /// Import items from an XML file. An unparsable document is a hard
    /// error; malformed items are skipped.
    pub fn import_xml(&self, path: &Path) -> StoreResult<usize> {
        let mut inner = self.lock();
        let bytes = std::fs::read(path)?;
        let envelopes = xml::decode(&bytes)?;
        let count = inner.apply_envelopes(envelopes);
        info!(path = %path.display(), count, "imported XML");
        Ok(count)
    }

    /// Import one `(type, tag)` entry from an XML file.
    pub fn import_single_xml(
        &self,
        path: &Path,
        type_key: &TypeKey,
        tag: &str,
    ) -> StoreResult<Option<ItemId>> {
        let mut inner = self.lock();
        let bytes = std::fs::read(path)?;
        let envelopes = xml::decode(&bytes)?;
        Ok(inner.apply_single(envelopes, type_key, tag))
    }

    /// Export all items as CSV rows.
    pub fn export_csv(&self, path: &Path) -> StoreResult<()> {
        let inner = self.lock();
        let envelopes = inner.collect_envelopes();
        let bytes = csv::encode(&envelopes)?;
        write_atomically(path, &bytes)?;
        info!(path = %path.display(), count = envelopes.len(), "exported CSV");
        Ok(())
    }

    /// Import items from a CSV file. A wrong header is a hard error;
    /// malformed rows are skipped. Rows carry no version, so payloads
    /// import at version 1.
    pub fn import_csv(&self, path: &Path) -> StoreResult<usize> {
        let mut inner = self.lock();
        let bytes = std::fs::read(path)?;
        let envelopes = csv::decode(&bytes)?;
        let count = inner.apply_envelopes(envelopes);
        info!(path = %path.display(), count, "imported CSV");
        Ok(count)
    }

    /// Import one `(type, tag)` entry from a CSV file.
    pub fn import_single_csv(
        &self,
        path: &Path,
        type_key: &TypeKey,
        tag: &str,
    ) -> StoreResult<Option<ItemId>> {
        let mut inner = self.lock();
        let bytes = std::fs::read(path)?;
        let envelopes = csv::decode(&bytes)?;
        Ok(inner.apply_single(envelopes, type_key, tag))
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Store")
            .field("item_count", &inner.items.len())
            .field("undo_depth", &inner.undo_history.len())
            .field("redo_depth", &inner.redo_queue.len())
            .finish()
    }
}

impl Inner {
    /// Push the current state onto the undo history and invalidate redo.
    fn save_state(&mut self) {
        let snapshot = self.items.clone();
        self.undo_history.push_back(snapshot);
        if self.undo_history.len() > MAX_UNDO_HISTORY {
            self.undo_history.pop_front();
        }
        self.redo_queue.clear();
    }

    /// Replace the live map with a snapshot and rebuild the derived
    /// indices so they stay consistent with it.
    fn restore(&mut self, state: State) {
        self.items = state;
        self.id_index = self
            .items
            .iter()
            .map(|(tag, item)| (item.id().clone(), tag.clone()))
            .collect();
        self.type_usage.clear();
        for item in self.items.values() {
            *self.type_usage.entry(item.type_key().clone()).or_insert(0) += 1;
        }
    }

    /// Register a type's decoder and schema on first use.
    fn ensure_registered<T: Storable>(&mut self) {
        let key = T::type_key();
        if self.registry.contains_key(&key) {
            return;
        }
        let decode: DecodeFn =
            Arc::new(|env: &Envelope| Box::new(ItemCell::<T>::from_envelope(env)));
        let schema: Option<SchemaFn> = match T::schema() {
            Some(_) => Some(Arc::new(|| T::schema().unwrap_or(Value::Null))),
            None => None,
        };
        self.registry.insert(key.clone(), TypeRegistration { decode, schema });
        if T::latest_version() > 1 {
            self.migrations.register_version(key.clone(), T::latest_version());
        }
        debug!(type_key = %key, "registered type");
    }

    /// Insert an item, maintaining the id index and usage counts. A
    /// replaced item's id entry and usage count are released.
    fn insert_item(&mut self, item: Box<dyn StoredItem>) {
        let tag = item.tag().to_string();
        let id = item.id().clone();
        *self.type_usage.entry(item.type_key().clone()).or_insert(0) += 1;
        let replaced = self.items.insert(tag.clone(), item);
        if let Some(old) = replaced {
            if old.id() != &id {
                self.id_index.remove(old.id());
            }
            self.release_type(old.type_key().clone());
        }
        self.id_index.insert(id, tag);
    }

    /// Decrement a type's usage count, evicting its registration at zero.
    fn release_type(&mut self, key: TypeKey) {
        let Some(count) = self.type_usage.get_mut(&key) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.type_usage.remove(&key);
            self.registry.remove(&key);
            debug!(type_key = %key, "evicted type registration");
        }
    }

    /// Build export envelopes for every live item, ordered by tag.
    fn collect_envelopes(&self) -> Vec<Envelope> {
        let mut tags: Vec<&String> = self.items.keys().collect();
        tags.sort();
        tags.into_iter()
            .map(|tag| {
                let item = &self.items[tag];
                let key = item.type_key();
                let schema = self
                    .registry
                    .get(key)
                    .and_then(|reg| reg.schema.as_ref())
                    .map(|produce| produce());
                let mut env = Envelope::new(
                    item.id().as_str(),
                    tag.clone(),
                    key.clone(),
                    item.payload(),
                );
                env.version = self.migrations.latest_version(key);
                env.schema = schema;
                env
            })
            .collect()
    }

    /// Migrate, decode, and insert a batch of envelopes. One undo
    /// snapshot covers the whole batch, taken only when something lands.
    fn apply_envelopes(&mut self, envelopes: Vec<Envelope>) -> usize {
        let mut staged: Vec<Box<dyn StoredItem>> = Vec::new();
        for env in envelopes {
            let Some(reg) = self.registry.get(&env.type_key) else {
                warn!(tag = %env.tag, type_key = %env.type_key, "skipping entry with unknown type");
                continue;
            };
            let decode = Arc::clone(&reg.decode);
            let mut env = env;
            env.data = self
                .migrations
                .upgrade_to_latest(&env.type_key, env.version, env.data);
            staged.push(decode(&env));
        }
        if staged.is_empty() {
            return 0;
        }
        self.save_state();
        let count = staged.len();
        for item in staged {
            self.insert_item(item);
        }
        count
    }

    /// Migrate, decode, and insert the first envelope matching
    /// `(type_key, tag)`, if any.
    fn apply_single(
        &mut self,
        envelopes: Vec<Envelope>,
        type_key: &TypeKey,
        tag: &str,
    ) -> Option<ItemId> {
        let env = envelopes
            .into_iter()
            .find(|e| e.type_key == *type_key && e.tag == tag)?;
        let Some(reg) = self.registry.get(&env.type_key) else {
            warn!(tag, type_key = %type_key, "no decoder registered for single import");
            return None;
        };
        let decode = Arc::clone(&reg.decode);
        let mut env = env;
        env.data = self
            .migrations
            .upgrade_to_latest(&env.type_key, env.version, env.data);
        let item = decode(&env);
        let id = item.id().clone();
        self.save_state();
        self.insert_item(item);
        debug!(tag, id = %id.short(), "imported single item");
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tempfile::tempdir;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        score: i64,
    }

    impl Storable for Profile {
        const TYPE_KEY: &'static str = "profile";
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Config {
        threshold: i64,
    }

    impl Storable for Config {
        const TYPE_KEY: &'static str = "config";

        fn schema() -> Option<Value> {
            Some(json!({"fields": {"threshold": "i64"}}))
        }

        fn latest_version() -> u32 {
            2
        }
    }

    fn profile(name: &str, score: i64) -> Profile {
        Profile {
            name: name.to_string(),
            score,
        }
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn add_then_get_roundtrips() {
        let store = Store::new();
        store.add(42i32, "item1");
        store.add(profile("Echo", 88), "p1");

        assert_eq!(store.get::<i32>("item1"), Some(42));
        assert_eq!(store.get::<Profile>("p1"), Some(profile("Echo", 88)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn get_miss_and_type_mismatch_yield_none() {
        let store = Store::new();
        store.add(1i32, "n");
        assert_eq!(store.get::<i32>("missing"), None);
        assert_eq!(store.get::<String>("n"), None);
    }

    #[test]
    fn modify_mutates_in_place() {
        let store = Store::new();
        store.add(profile("Echo", 88), "p");
        assert!(store.modify::<Profile>("p", |p| p.score += 10));
        assert_eq!(store.get::<Profile>("p").unwrap().score, 98);
    }

    #[test]
    fn modify_miss_or_mismatch_returns_false_without_snapshot() {
        let store = Store::new();
        store.add(1i32, "n");
        assert!(!store.modify::<i32>("missing", |_| {}));
        assert!(!store.modify::<String>("n", |_| {}));

        // Only the add left history behind.
        assert!(store.undo());
        assert!(!store.undo());
    }

    #[test]
    fn with_item_borrows_and_hard_fails() {
        let store = Store::new();
        store.add(profile("Echo", 88), "p");

        let len = store.with_item::<Profile, _>("p", |p| p.name.len()).unwrap();
        assert_eq!(len, 4);

        assert!(matches!(
            store.with_item::<Profile, _>("missing", |_| ()),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.with_item::<i32, _>("p", |_| ()),
            Err(StoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn with_item_mut_bypasses_undo_history() {
        let store = Store::new();
        store.add(1i32, "a");
        store.with_item_mut::<i32, _>("a", |v| *v = 5).unwrap();
        assert_eq!(store.get::<i32>("a"), Some(5));

        // The in-place mutation took no snapshot, so one undo jumps
        // straight past it to the empty store.
        assert!(store.undo());
        assert!(!store.has_item("a"));
    }

    #[test]
    fn remove_reports_presence() {
        let store = Store::new();
        store.add(1i32, "a");
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(matches!(
            store.remove(""),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn overwriting_a_tag_releases_the_old_item() {
        let store = Store::new();
        let old_id = store.add(profile("Echo", 88), "slot");
        let new_id = store.add(7i32, "slot");

        assert_eq!(store.len(), 1);
        assert_eq!(store.item_id("slot"), Some(new_id));
        assert_eq!(store.ids().len(), 1);
        assert_ne!(store.ids()[0].0, old_id);
        // The replaced type's registration went away with its last item.
        assert_eq!(store.registered_types(), vec![TypeKey::new("i32")]);
    }

    #[test]
    fn removing_last_item_evicts_type_registration() {
        let store = Store::new();
        store.add(1i32, "a");
        store.add(2i32, "b");
        store.remove("a").unwrap();
        assert_eq!(store.registered_types(), vec![TypeKey::new("i32")]);

        store.remove("b").unwrap();
        assert!(store.registered_types().is_empty());
        assert!(store.type_names().is_empty());
    }

    // -----------------------------------------------------------------------
    // Undo / redo
    // -----------------------------------------------------------------------

    #[test]
    fn undo_reverses_each_mutation_kind() {
        let store = Store::new();
        store.add(1i32, "a");
        store.modify::<i32>("a", |v| *v = 2);
        store.remove("a").unwrap();

        assert!(store.undo());
        assert_eq!(store.get::<i32>("a"), Some(2));
        assert!(store.undo());
        assert_eq!(store.get::<i32>("a"), Some(1));
        assert!(store.undo());
        assert!(store.is_empty());
        assert!(!store.undo());
    }

    #[test]
    fn redo_is_the_exact_inverse_of_undo() {
        let store = Store::new();
        store.add(1i32, "a");
        store.add(2i32, "b");
        store.modify::<i32>("a", |v| *v = 10);

        assert!(store.undo());
        assert!(store.undo());
        assert_eq!(store.len(), 1);

        assert!(store.redo());
        assert_eq!(store.get::<i32>("b"), Some(2));
        assert_eq!(store.get::<i32>("a"), Some(1));
        assert!(store.redo());
        assert_eq!(store.get::<i32>("a"), Some(10));
        assert!(!store.redo());
    }

    #[test]
    fn new_mutation_invalidates_redo() {
        let store = Store::new();
        store.add(1i32, "a");
        assert!(store.undo());
        store.add(3i32, "c");
        assert!(!store.redo());
    }

    #[test]
    fn undo_history_is_bounded() {
        let store = Store::new();
        for i in 0..55i32 {
            store.add(i, "t");
        }
        for _ in 0..50 {
            assert!(store.undo());
        }
        assert!(!store.undo());
        // The oldest five snapshots were evicted.
        assert_eq!(store.get::<i32>("t"), Some(4));
    }

    #[test]
    fn undo_rebuilds_indices() {
        let store = Store::new();
        let id = store.add(1i32, "a");
        store.remove("a").unwrap();
        assert!(store.undo());

        assert_eq!(store.item_id("a"), Some(id));
        assert_eq!(store.type_names(), vec![TypeKey::new("i32")]);
    }

    proptest! {
        #[test]
        fn undo_then_redo_restores_state(count in 1usize..12, steps in 1usize..12) {
            let store = Store::new();
            for i in 0..count {
                store.add(i as i32, &format!("t{i}"));
            }
            let before: Vec<(String, Option<i32>)> = store
                .tags()
                .into_iter()
                .map(|t| (t.clone(), store.get::<i32>(&t)))
                .collect();

            let steps = steps.min(count);
            for _ in 0..steps {
                prop_assert!(store.undo());
            }
            for _ in 0..steps {
                prop_assert!(store.redo());
            }

            let after: Vec<(String, Option<i32>)> = store
                .tags()
                .into_iter()
                .map(|t| (t.clone(), store.get::<i32>(&t)))
                .collect();
            prop_assert_eq!(before, after);
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    #[test]
    fn tags_and_filters_are_sorted() {
        let store = Store::new();
        store.add(1i32, "zebra");
        store.add(2i32, "apple");
        store.add(3i32, "mango");

        assert_eq!(store.tags(), vec!["apple", "mango", "zebra"]);
        let wanted = vec!["zebra".to_string(), "ghost".to_string(), "apple".to_string()];
        assert_eq!(store.filter_by_tags(&wanted), vec!["apple", "zebra"]);

        let pair_tags: Vec<String> = store.ids().into_iter().map(|(_, t)| t).collect();
        assert_eq!(pair_tags, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn id_lookups_track_overwrite_remove_and_undo() {
        let store = Store::new();
        let a = store.add(1i32, "a");
        let b = store.add(2i32, "b");
        assert_eq!(store.tag_for_id(&a), Some("a".to_string()));

        // Overwrite retires the old id; remove retires the tag.
        let a2 = store.add(3i32, "a");
        assert_eq!(store.tag_for_id(&a), None);
        assert_eq!(store.tag_for_id(&a2), Some("a".to_string()));
        store.remove("b").unwrap();
        assert_eq!(store.tag_for_id(&b), None);

        // Undo restores the removed item's id mapping.
        assert!(store.undo());
        assert_eq!(store.tag_for_id(&b), Some("b".to_string()));
        let ids: Vec<ItemId> = store.ids().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a2) && ids.contains(&b));
    }

    #[test]
    fn clear_resets_everything() {
        let store = Store::new();
        store.add(1i32, "a");
        store.add(profile("Echo", 1), "p");
        store.clear();

        assert!(store.is_empty());
        assert!(store.registered_types().is_empty());
        assert!(!store.undo());
        assert!(!store.redo());
    }

    // -----------------------------------------------------------------------
    // Import / export
    // -----------------------------------------------------------------------

    /// A store with decoders registered for the test types, ready to
    /// receive imports.
    fn seeded_store() -> Store {
        let store = Store::new();
        store.add(0i32, "seed_i32");
        store.add(Profile::default(), "seed_profile");
        store
    }

    #[test]
    fn json_export_uses_flat_envelopes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Store::new();
        store.add(42i32, "item1");
        store.export_json(&path).unwrap();

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &doc.as_array().unwrap()[0];
        assert_eq!(entry["tag"], json!("item1"));
        assert_eq!(entry["type"], json!("i32"));
        assert_eq!(entry["version"], json!(1));
        assert_eq!(entry["data"], json!(42));
        assert!(entry["id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[test]
    fn json_roundtrip_preserves_values_and_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let source = Store::new();
        let id = source.add(42i32, "item1");
        source.add(profile("Echo", 88), "p1");
        source.export_json(&path).unwrap();

        let target = seeded_store();
        assert_eq!(target.import_json(&path).unwrap(), 2);
        assert_eq!(target.get::<i32>("item1"), Some(42));
        assert_eq!(target.get::<Profile>("p1"), Some(profile("Echo", 88)));
        assert_eq!(target.item_id("item1"), Some(id));
    }

    #[test]
    fn binary_roundtrip_preserves_values_and_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let source = Store::new();
        let id = source.add(42i32, "item1");
        source.add(profile("Echo", 88), "p1");
        source.export_binary(&path).unwrap();

        let target = seeded_store();
        assert_eq!(target.import_binary(&path).unwrap(), 2);
        assert_eq!(target.get::<i32>("item1"), Some(42));
        assert_eq!(target.item_id("item1"), Some(id));
    }

    #[test]
    fn xml_roundtrip_preserves_values_and_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.xml");
        let source = Store::new();
        let id = source.add(42i32, "item1");
        source.add(profile("Echo", 88), "p1");
        source.export_xml(&path).unwrap();

        let target = seeded_store();
        assert_eq!(target.import_xml(&path).unwrap(), 2);
        assert_eq!(target.get::<Profile>("p1"), Some(profile("Echo", 88)));
        assert_eq!(target.item_id("item1"), Some(id));
    }

    #[test]
    fn csv_roundtrip_preserves_values_and_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.csv");
        let source = Store::new();
        let id = source.add(42i32, "item1");
        source.add(profile("Echo", 88), "p1");
        source.export_csv(&path).unwrap();

        let target = seeded_store();
        assert_eq!(target.import_csv(&path).unwrap(), 2);
        assert_eq!(target.get::<i32>("item1"), Some(42));
        assert_eq!(target.get::<Profile>("p1"), Some(profile("Echo", 88)));
        assert_eq!(target.item_id("item1"), Some(id));
    }

    #[test]
    fn export_orders_entries_by_tag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Store::new();
        store.add(1i32, "b");
        store.add(2i32, "a");
        store.export_json(&path).unwrap();

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let tags: Vec<&str> = doc
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["tag"].as_str().unwrap())
            .collect();
        assert_eq!(tags, vec!["a", "b"]);
    }

    #[test]
    fn xml_import_skips_entries_with_unregistered_types() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.xml");
        let source = Store::new();
        source.add(42i32, "item1");
        source.add(profile("Echo", 88), "p1");
        source.export_xml(&path).unwrap();

        let target = Store::new();
        target.add(0i32, "seed_i32");
        assert_eq!(target.import_xml(&path).unwrap(), 1);
        assert!(target.has_item("item1"));
        assert!(!target.has_item("p1"));
    }

    #[test]
    fn import_skips_entries_with_unregistered_types() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let source = Store::new();
        source.add(42i32, "item1");
        source.add(profile("Echo", 88), "p1");
        source.export_json(&path).unwrap();

        // Only i32 is registered on the target.
        let target = Store::new();
        target.add(0i32, "seed_i32");
        assert_eq!(target.import_json(&path).unwrap(), 1);
        assert!(target.has_item("item1"));
        assert!(!target.has_item("p1"));
    }

    #[test]
    fn import_is_one_undoable_step() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let source = Store::new();
        source.add(1i32, "a");
        source.add(2i32, "b");
        source.export_json(&path).unwrap();

        let target = Store::new();
        target.add(0i32, "seed_i32");
        target.import_json(&path).unwrap();
        assert_eq!(target.len(), 3);

        assert!(target.undo());
        assert_eq!(target.tags(), vec!["seed_i32"]);
    }

    #[test]
    fn import_of_nothing_leaves_no_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let source = Store::new();
        source.add(profile("Echo", 88), "p1");
        source.export_json(&path).unwrap();

        // No registered types match, so nothing lands and no snapshot is
        // taken.
        let target = Store::new();
        assert_eq!(target.import_json(&path).unwrap(), 0);
        assert!(!target.undo());
    }

    #[test]
    fn import_single_picks_one_matching_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let source = Store::new();
        let id = source.add(42i32, "item1");
        source.add(7i32, "item2");
        source.export_json(&path).unwrap();

        let target = Store::new();
        target.add(0i32, "seed_i32");
        let imported = target
            .import_single_json(&path, &TypeKey::new("i32"), "item1")
            .unwrap();
        assert_eq!(imported, Some(id));
        assert!(target.has_item("item1"));
        assert!(!target.has_item("item2"));

        let missing = target
            .import_single_json(&path, &TypeKey::new("i32"), "nope")
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let store = Store::new();
        let err = store.import_json(Path::new("/nonexistent/store.json")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    // -----------------------------------------------------------------------
    // Migrations and schemas
    // -----------------------------------------------------------------------

    #[test]
    fn import_upgrades_old_payloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        // A version-1 file written by an older build, where the field was
        // still called "limit".
        let doc = json!([{
            "id": "obj_1",
            "tag": "cfg",
            "type": "config",
            "version": 1,
            "data": {"limit": 30}
        }]);
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let store = Store::new();
        store.add(Config::default(), "seed_config");
        store.register_migration(
            TypeKey::new("config"),
            1,
            Box::new(|v| json!({"threshold": v["limit"]})),
        );

        assert_eq!(store.import_json(&path).unwrap(), 1);
        assert_eq!(store.get::<Config>("cfg"), Some(Config { threshold: 30 }));
        assert_eq!(store.migration_log().len(), 1);
        assert!(store.migration_log()[0].contains("v1 -> v2"));

        store.clear_migration_log();
        assert!(store.migration_log().is_empty());
    }

    #[test]
    fn export_carries_registered_version_and_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Store::new();
        store.add(Config { threshold: 5 }, "cfg");
        store.add(1i32, "n");
        store.export_json(&path).unwrap();

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entries = doc.as_array().unwrap();
        let cfg = entries.iter().find(|e| e["tag"] == json!("cfg")).unwrap();
        let n = entries.iter().find(|e| e["tag"] == json!("n")).unwrap();

        assert_eq!(cfg["version"], json!(2));
        assert_eq!(cfg["schema"], json!({"fields": {"threshold": "i64"}}));
        assert_eq!(n["version"], json!(1));
        assert!(n.get("schema").is_none());
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_adds_all_land() {
        let store = Arc::new(Store::new());
        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    store.add(i as i32, &format!("w{worker}_i{i}"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 200);
    }

    #[test]
    fn mixed_concurrent_ops_keep_indices_consistent() {
        let store = Arc::new(Store::new());
        for i in 0..10 {
            store.add(i as i32, &format!("base{i}"));
        }

        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..20 {
                    let tag = format!("w{worker}_i{i}");
                    store.add(i as i32, &tag);
                    let _ = store.get::<i32>(&tag);
                    if i % 3 == 0 {
                        store.remove(&tag).unwrap();
                    }
                    if i % 5 == 0 {
                        store.undo();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Tag map and id index agree entry-for-entry in both directions.
        let pairs = store.ids();
        assert_eq!(pairs.len(), store.len());
        for (id, tag) in pairs {
            assert_eq!(store.item_id(&tag), Some(id.clone()));
            assert_eq!(store.tag_for_id(&id), Some(tag));
        }
    }
}
