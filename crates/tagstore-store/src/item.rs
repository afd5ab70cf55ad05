//! The type-erased item abstraction.
//!
//! [`Storable`] is the compile-time contract a value type signs to live in
//! the store; [`StoredItem`] is the object-safe capability set the store
//! actually holds, implemented once by the generic [`ItemCell`] adapter.
//! The store only ever owns `Box<dyn StoredItem>` handles, so values of
//! unrelated types share one map.

use std::any::Any;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use tagstore_types::{Envelope, ItemId, TypeKey};

/// Contract for values the store can hold.
///
/// `TYPE_KEY` is the stable registration name carried in serialized files;
/// it must be explicit and unique per type, never derived from runtime
/// type names. `Default` provides the fallback value when an imported
/// payload fails to decode.
pub trait Storable:
    Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static
{
    /// Stable registration key for this type.
    const TYPE_KEY: &'static str;

    /// The key as a [`TypeKey`] value.
    fn type_key() -> TypeKey {
        TypeKey::new(Self::TYPE_KEY)
    }

    /// Optional schema attached to exported envelopes of this type.
    fn schema() -> Option<Value> {
        None
    }

    /// Latest schema version of this type's payload.
    fn latest_version() -> u32 {
        1
    }
}

macro_rules! storable_primitive {
    ($($ty:ty => $key:literal),* $(,)?) => {
        $(
            impl Storable for $ty {
                const TYPE_KEY: &'static str = $key;
            }
        )*
    };
}

storable_primitive! {
    i32 => "i32",
    i64 => "i64",
    u32 => "u32",
    f64 => "f64",
    bool => "bool",
    String => "string",
}

/// Object-safe capability set of one stored item.
///
/// An item's tag, id, and type key never change after construction;
/// `clone_boxed` yields a deep copy with the same identity.
pub trait StoredItem: Send + Sync {
    /// Globally unique identity of this item.
    fn id(&self) -> &ItemId;

    /// Tag this item is stored under.
    fn tag(&self) -> &str;

    /// Registered key of the concrete value type.
    fn type_key(&self) -> &TypeKey;

    /// Structured payload of the value, used both as the envelope's `data`
    /// field and as the generic projection for formats that want raw data.
    /// A value that cannot be serialized degrades to `null` with a warning.
    fn payload(&self) -> Value;

    /// Deep copy preserving id, tag, and type.
    fn clone_boxed(&self) -> Box<dyn StoredItem>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn StoredItem> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

impl std::fmt::Debug for Box<dyn StoredItem> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredItem")
            .field("id", &self.id().short())
            .field("tag", &self.tag())
            .field("type", &self.type_key())
            .finish()
    }
}

/// Generic adapter implementing [`StoredItem`] for any [`Storable`] value.
pub struct ItemCell<T: Storable> {
    id: ItemId,
    tag: String,
    type_key: TypeKey,
    value: T,
}

impl<T: Storable> ItemCell<T> {
    /// Wrap a fresh value under a tag, assigning a new id.
    pub fn new(value: T, tag: impl Into<String>) -> Self {
        Self {
            id: ItemId::generate(),
            tag: tag.into(),
            type_key: T::type_key(),
            value,
        }
    }

    /// Reconstruct an item from a decoded envelope.
    ///
    /// The envelope's id is reused when present, otherwise generated. A
    /// payload that fails to decode falls back to the type's default value
    /// rather than failing the import.
    pub fn from_envelope(env: &Envelope) -> Self {
        let value = match serde_json::from_value::<T>(env.data.clone()) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    tag = %env.tag,
                    type_key = %env.type_key,
                    error = %e,
                    "payload decode failed; using default value"
                );
                T::default()
            }
        };
        Self {
            id: ItemId::resolve(&env.id),
            tag: env.tag.clone(),
            type_key: T::type_key(),
            value,
        }
    }

    /// Borrow the wrapped value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Mutably borrow the wrapped value.
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Storable> StoredItem for ItemCell<T> {
    fn id(&self) -> &ItemId {
        &self.id
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn type_key(&self) -> &TypeKey {
        &self.type_key
    }

    fn payload(&self) -> Value {
        match serde_json::to_value(&self.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(tag = %self.tag, error = %e, "payload serialization failed");
                Value::Null
            }
        }
    }

    fn clone_boxed(&self) -> Box<dyn StoredItem> {
        Box::new(Self {
            id: self.id.clone(),
            tag: self.tag.clone(),
            type_key: self.type_key.clone(),
            value: self.value.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
