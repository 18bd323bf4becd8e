//! Per-session settings
//!
//! A key/value bag application code uses to attach data to a connection.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Value = Arc<dyn Any + Send + Sync>;

/// Concurrent key/value store owned by one session
///
/// Values are type-erased; reads name the type they expect and get `None` on a
/// mismatch. There is no eviction or size bound.
#[derive(Default)]
pub struct Settings {
    data: RwLock<HashMap<String, Value>>,
}

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning whether an existing value was replaced
    pub fn set<T>(&self, key: impl Into<String>, value: T) -> bool
    where
        T: Any + Send + Sync,
    {
        self.data.write().insert(key.into(), Arc::new(value)).is_some()
    }

    /// Get a shared handle to the value under `key` if it has type `T`
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.data.read().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Get a copy of the value under `key` if it has type `T`
    pub fn get_cloned<T>(&self, key: &str) -> Option<T>
    where
        T: Any + Send + Sync + Clone,
    {
        self.get::<T>(key).map(|value| T::clone(&value))
    }

    /// Get a copy of the value under `key`, or `default` if absent or of another type
    pub fn get_or<T>(&self, key: &str, default: T) -> T
    where
        T: Any + Send + Sync + Clone,
    {
        self.get_cloned(key).unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Remove `key`, returning whether it was present
    pub fn remove(&self, key: &str) -> bool {
        self.data.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.data.write().clear();
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Snapshot of the stored keys, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("keys", &self.keys())
            .finish()
    }
}
