//! Store contract: the abstract KV operations the cache engine is layered
//! on. Grounded on the teacher's `storage::kv::KvStore`
//! (`Arc<parking_lot::RwLock<HashMap<..>>>`-backed map) and
//! `examples/original_source/ihashmap/cache.py::CacheProtocol` for the exact
//! operation set (`get`/`set`/`update`/`delete`/`keys`/`pop`, namespace as
//! first argument). TTL, snapshot persistence, and typed Parquet values are
//! dropped from the teacher's `KvStore` — durability is an explicit
//! Non-goal for this engine.

use crate::error::{CacheError, CacheResult};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Abstract KV operations, scoped by namespace. Implementations must be
/// internally thread-safe (the cache facade serializes its own calls behind
/// a cache lock, but index hooks reach the store through dedicated
/// pipelines and may interleave with ordinary reads).
///
/// All operations are total except `delete`, which reports [`CacheError::NotFound`]
/// when the key is absent. Unknown namespaces read as empty/`default`; they
/// are created implicitly on write.
pub trait Store: Send + Sync {
    fn get(&self, namespace: &str, key: &str, default: Value) -> Value;
    fn set(&self, namespace: &str, key: &str, value: Value);
    /// Shallow-merges `partial`'s keys into the stored value (creating it if
    /// absent). If `fields` is `Some`, only those keys of `partial` are applied.
    fn update(&self, namespace: &str, key: &str, partial: Value, fields: Option<&[String]>);
    fn delete(&self, namespace: &str, key: &str) -> CacheResult<()>;
    /// Snapshot-like; order is unspecified but stable within one call.
    fn keys(&self, namespace: &str) -> Vec<String>;
    /// Atomic get-and-remove.
    fn pop(&self, namespace: &str, key: &str, default: Value) -> Value;
}

/// In-memory reference implementation of [`Store`], used by the engine's own
/// test suite and as the default backend for embedders with no durability
/// requirement.
#[derive(Clone, Default)]
pub struct MemoryStore {
    namespaces: Arc<RwLock<HashMap<String, HashMap<String, Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn shallow_merge(existing: &mut Value, partial: &Value, fields: Option<&[String]>) {
    let Value::Object(partial_map) = partial else {
        *existing = partial.clone();
        return;
    };
    if !existing.is_object() {
        *existing = Value::Object(Default::default());
    }
    let existing_map = existing.as_object_mut().expect("forced to object above");
    match fields {
        Some(fields) => {
            for field in fields {
                if let Some(v) = partial_map.get(field) {
                    existing_map.insert(field.clone(), v.clone());
                }
            }
        }
        None => {
            for (k, v) in partial_map {
                existing_map.insert(k.clone(), v.clone());
            }
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, namespace: &str, key: &str, default: Value) -> Value {
        self.namespaces
            .read()
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned()
            .unwrap_or(default)
    }

    fn set(&self, namespace: &str, key: &str, value: Value) {
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn update(&self, namespace: &str, key: &str, partial: Value, fields: Option<&[String]>) {
        let mut guard = self.namespaces.write();
        let ns = guard.entry(namespace.to_string()).or_default();
        let entry = ns.entry(key.to_string()).or_insert(Value::Object(Default::default()));
        shallow_merge(entry, &partial, fields);
    }

    fn delete(&self, namespace: &str, key: &str) -> CacheResult<()> {
        let mut guard = self.namespaces.write();
        match guard.get_mut(namespace).and_then(|ns| ns.remove(key)) {
            Some(_) => Ok(()),
            None => Err(CacheError::not_found(namespace, key)),
        }
    }

    fn keys(&self, namespace: &str) -> Vec<String> {
        self.namespaces
            .read()
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn pop(&self, namespace: &str, key: &str, default: Value) -> Value {
        self.namespaces
            .write()
            .get_mut(namespace)
            .and_then(|ns| ns.remove(key))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("users", "1", json!({"_id": "1", "model": 1}));
        assert_eq!(store.get("users", "1", Value::Null), json!({"_id": "1", "model": 1}));
    }

    #[test]
    fn get_on_unknown_namespace_or_key_yields_default() {
        let store = MemoryStore::new();
        assert_eq!(store.get("users", "1", json!("default")), json!("default"));
    }

    #[test]
    fn update_shallow_merges_and_respects_fields_filter() {
        let store = MemoryStore::new();
        store.set("users", "1", json!({"_id": "1", "model": 1, "name": "a"}));
        store.update("users", "1", json!({"model": 2, "name": "b"}), Some(&["model".to_string()]));
        assert_eq!(store.get("users", "1", Value::Null), json!({"_id": "1", "model": 2, "name": "a"}));
    }

    #[test]
    fn delete_missing_key_reports_not_found() {
        let store = MemoryStore::new();
        let err = store.delete("users", "1").unwrap_err();
        assert_eq!(err.kind(), crate::error::CacheErrorKind::NotFound);
    }

    #[test]
    fn pop_removes_and_returns_atomically() {
        let store = MemoryStore::new();
        store.set("users", "1", json!("value"));
        assert_eq!(store.pop("users", "1", Value::Null), json!("value"));
        assert_eq!(store.get("users", "1", json!("gone")), json!("gone"));
    }

    #[test]
    fn keys_snapshot_reflects_current_namespace_contents() {
        let store = MemoryStore::new();
        store.set("users", "1", json!({}));
        store.set("users", "2", json!({}));
        let mut keys = store.keys("users");
        keys.sort();
        assert_eq!(keys, vec!["1".to_string(), "2".to_string()]);
    }
}
