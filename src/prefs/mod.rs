//! Persisted preference capability
//!
//! The rendering shell persists a handful of user choices (sort order,
//! column layout, source-name mapping). Persistence itself is an external
//! concern; this module defines the capability the engines are constructed
//! with, plus an in-memory implementation used for embedding and tests.
//! Malformed or absent values always fall back to defaults, never error.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Preference key for the connection sort column and direction
pub const KEY_SORT: &str = "connectionsSort";
/// Preference key for hidden column accessors
pub const KEY_HIDDEN_COLUMNS: &str = "hiddenColumns";
/// Preference key for column display order
pub const KEY_COLUMN_ORDER: &str = "columns";
/// Preference key for the source-name mapping table
pub const KEY_SOURCE_MAP: &str = "sourceMap";

/// Plain key-value persistence capability
///
/// Implementations own the storage medium; callers never observe storage
/// failures, only absent values.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn remove(&self, key: &str);
}

/// In-memory preference store
#[derive(Debug, Default)]
pub struct MemoryPrefs {
    map: RwLock<HashMap<String, Value>>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPrefs {
    fn get(&self, key: &str) -> Option<Value> {
        self.map.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.map.write().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.map.write().remove(key);
    }
}

/// Read a typed preference, substituting `default` when the key is absent
/// or the stored value does not deserialize
pub fn get_or_default<T: DeserializeOwned>(store: &dyn PreferenceStore, key: &str, default: T) -> T {
    match store.get(key) {
        Some(value) => match serde_json::from_value(value) {
            Ok(v) => v,
            Err(e) => {
                debug!("malformed preference {}: {}", key, e);
                default
            }
        },
        None => default,
    }
}

/// Store a typed preference; serialization failure drops the write
pub fn set_json<T: Serialize>(store: &dyn PreferenceStore, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(v) => store.set(key, v),
        Err(e) => debug!("failed to serialize preference {}: {}", key, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_roundtrip() {
        let prefs = MemoryPrefs::new();
        prefs.set("k", json!([1, 2, 3]));
        assert_eq!(prefs.get("k"), Some(json!([1, 2, 3])));
        prefs.remove("k");
        assert_eq!(prefs.get("k"), None);
    }

    #[test]
    fn test_get_or_default_absent() {
        let prefs = MemoryPrefs::new();
        let v: Vec<String> = get_or_default(&prefs, "missing", vec!["id".to_string()]);
        assert_eq!(v, vec!["id"]);
    }

    #[test]
    fn test_get_or_default_malformed() {
        let prefs = MemoryPrefs::new();
        prefs.set("n", json!("not a number"));
        let v: u32 = get_or_default(&prefs, "n", 7);
        assert_eq!(v, 7);
    }

    #[test]
    fn test_set_json_typed() {
        let prefs = MemoryPrefs::new();
        set_json(&prefs, "cols", &vec!["host", "rule"]);
        let v: Vec<String> = get_or_default(&prefs, "cols", Vec::new());
        assert_eq!(v, vec!["host", "rule"]);
    }
}
