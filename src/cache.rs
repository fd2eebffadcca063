//! `Cache`: the public facade tying the store, pipelines, index registry,
//! and planner together into `set`/`get`/`update`/`delete`/`all`/`search`.
//!
//! Grounded on `examples/original_source/ihashmap/cache.py::Cache`. The
//! Python class is a process-wide singleton (`__new__` returns a shared
//! instance, guarded by an `RLock` on every public method). Per spec.md
//! §9's design note, the index registry here is owned by (injected into) a
//! `Cache` value instead of living behind a hidden global, so multiple
//! independent caches can coexist in one process; [`Cache::install`] and
//! [`Cache::global`] provide the original's singleton convenience as an
//! optional layer on top.

use crate::error::{CacheError, CacheResult};
use crate::index::{Index, IndexDef, IndexRegistry};
use crate::pipeline::{Context, PipelineManager};
use crate::planner;
use crate::store::{MemoryStore, Store};
use crate::value::{Entity, Query};
use parking_lot::ReentrantMutex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Default primary-key field name, matching `ihashmap`'s `_id`.
pub const DEFAULT_PK_FIELD: &str = "_id";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub pk_field: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { pk_field: DEFAULT_PK_FIELD.to_string() }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pk_field(mut self, name: impl Into<String>) -> Self {
        self.pk_field = name.into();
        self
    }
}

fn value_to_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The indexed-cache facade. Cheap to construct, `Send + Sync`, and safe to
/// share behind an `Arc` across threads.
pub struct Cache {
    store: Arc<dyn Store>,
    pipelines: Arc<PipelineManager>,
    indexes: IndexRegistry,
    pk_field: String,
    /// Serializes every public operation. Reentrant because maintenance
    /// hooks read the store directly rather than recursing back through
    /// `Cache`'s own methods, but a hook that *did* call back into a public
    /// method from the same thread must not deadlock, per spec.md §5.
    lock: ReentrantMutex<()>,
}

impl Cache {
    /// Builds a cache over `store` with default configuration
    /// (`pk_field = "_id"`), pre-registering the built-in PK index.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    /// Builds a cache with an in-memory [`MemoryStore`] backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn with_config(store: Arc<dyn Store>, config: CacheConfig) -> Self {
        let pipelines = Arc::new(PipelineManager::new());
        let indexes = IndexRegistry::new();
        let cache = Self { store, pipelines, indexes, pk_field: config.pk_field, lock: ReentrantMutex::new(()) };
        cache.indexes.register(IndexDef::primary_key(), cache.store.clone(), cache.pipelines.clone(), cache.pk_field.clone());
        cache
    }

    pub fn pk_field(&self) -> &str {
        &self.pk_field
    }

    /// Registers a secondary index, wiring its maintenance hooks onto this
    /// cache's pipelines. Safe to call after entities already exist in the
    /// target namespace only if the caller accepts that pre-existing
    /// entities won't be backfilled into the new index — backfill is out of
    /// scope (see spec.md's Non-goals).
    pub fn register_index(&self, def: IndexDef) -> Arc<Index> {
        let _guard = self.lock.lock();
        self.indexes.register(def, self.store.clone(), self.pipelines.clone(), self.pk_field.clone())
    }

    pub fn set(&self, namespace: &str, entity: Entity) -> CacheResult<()> {
        let _guard = self.lock.lock();
        let pk = entity
            .get(&self.pk_field)
            .cloned()
            .ok_or_else(|| CacheError::missing_primary_key(self.pk_field.clone()))?;
        let key = value_to_key(&pk);
        let mut ctx = Context::new(namespace, vec![Value::Object(entity)]);
        self.pipelines.run("set", &mut ctx, |ctx| {
            let value = ctx.arg(0).cloned().unwrap_or(Value::Null);
            self.store.set(namespace, &key, value);
            ctx.result = Some(Value::Null);
            Ok(())
        })
    }

    pub fn get(&self, namespace: &str, key: &str, default: Value) -> CacheResult<Value> {
        let _guard = self.lock.lock();
        let mut ctx = Context::new(namespace, vec![Value::String(key.to_string()), default.clone()]);
        self.pipelines.run("get", &mut ctx, |ctx| {
            let k = ctx.arg(0).and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let d = ctx.arg(1).cloned().unwrap_or(Value::Null);
            ctx.result = Some(self.store.get(namespace, &k, d));
            Ok(())
        })?;
        Ok(ctx.result.unwrap_or(default))
    }

    /// Shallow-merges `entity`'s fields into the stored entity at its own
    /// primary key, restricting the merge to `fields` when given.
    pub fn update(&self, namespace: &str, entity: Entity, fields: Option<Vec<String>>) -> CacheResult<()> {
        let _guard = self.lock.lock();
        let pk = entity
            .get(&self.pk_field)
            .cloned()
            .ok_or_else(|| CacheError::missing_primary_key(self.pk_field.clone()))?;
        let key = value_to_key(&pk);
        let fields_arg = match &fields {
            Some(f) => Value::Array(f.iter().cloned().map(Value::String).collect()),
            None => Value::Null,
        };
        let mut ctx = Context::new(namespace, vec![Value::Object(entity), fields_arg]);
        self.pipelines.run("update", &mut ctx, |ctx| {
            let partial = ctx.arg(0).cloned().unwrap_or(Value::Null);
            let fields: Option<Vec<String>> = ctx
                .arg(1)
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect());
            self.store.update(namespace, &key, partial, fields.as_deref());
            ctx.result = Some(Value::Null);
            Ok(())
        })
    }

    pub fn delete(&self, namespace: &str, key: &str) -> CacheResult<()> {
        let _guard = self.lock.lock();
        let mut ctx = Context::new(namespace, vec![Value::String(key.to_string())]);
        self.pipelines.run("delete", &mut ctx, |ctx| {
            let k = ctx.arg(0).and_then(|v| v.as_str()).unwrap_or_default().to_string();
            self.store.delete(namespace, &k)?;
            ctx.result = Some(Value::Null);
            Ok(())
        })
    }

    /// Every entity currently stored under `namespace`, unfiltered. Does not
    /// go through the `get` pipeline since it isn't a single-key fetch.
    pub fn all(&self, namespace: &str) -> Vec<Entity> {
        let _guard = self.lock.lock();
        self.store
            .keys(namespace)
            .into_iter()
            .filter_map(|k| match self.store.get(namespace, &k, Value::Null) {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect()
    }

    /// Runs a conjunctive query via the planner, consulting whichever
    /// registered indexes cover it.
    pub fn search(&self, namespace: &str, query: &Query) -> Vec<Entity> {
        let _guard = self.lock.lock();
        planner::search(self.store.as_ref(), &self.indexes, namespace, &self.pk_field, query)
    }

    /// Raw `(key, value)` dump of a namespace, bypassing pipelines and the
    /// entity-shape assumption — useful for inspecting index-internal
    /// namespaces during debugging. Grounded on
    /// `ihashmap.cache.Cache.find_all`'s raw namespace dump.
    pub fn iter_raw(&self, namespace: &str) -> Vec<(String, Value)> {
        let _guard = self.lock.lock();
        self.store.keys(namespace).into_iter().map(|k| {
            let v = self.store.get(namespace, &k, Value::Null);
            (k, v)
        }).collect()
    }
}

static GLOBAL: OnceLock<Cache> = OnceLock::new();

impl Cache {
    /// Installs `cache` as the process-wide instance. Returns the cache back
    /// if one was already installed.
    pub fn install(cache: Cache) -> Result<(), Cache> {
        GLOBAL.set(cache)
    }

    /// The process-wide instance, if [`Cache::install`] has been called.
    pub fn global() -> Option<&'static Cache> {
        GLOBAL.get()
    }
}
