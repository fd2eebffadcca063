//! Index declarations, key encoding, and maintenance hooks.
//!
//! Grounded on `examples/original_source/ihashmap/index.py::Index`/`PkIndex`:
//! field-list normalization, forward/reverse storage namespace composition,
//! and the six maintenance hooks (`before_create`/`after_create`/
//! `before_delete`/`after_delete`/`before_update`/`after_update`). Two of the
//! original's behaviors are corrected per spec.md §9's design notes rather
//! than reproduced as-is: `after_delete` removes only the affected PK from
//! the PK-set (deleting the bucket only once it empties) instead of
//! discarding the whole bucket, and index insertion always unions with
//! whatever PK-set already occupies the target key instead of overwriting it
//! with a singleton list. The built-in PK index additionally tolerates a
//! `set` that replaces the entity already occupying its own PK slot, per the
//! same design notes.

use crate::error::{CacheError, CacheResult};
use crate::pipeline::{Action, Context, PipelineManager};
use crate::store::Store;
use crate::value::Entity;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const FORWARD_PREFIX: &str = "_index_:";
pub const REVERSE_PREFIX: &str = "_reverse_index_:";

/// Sentinel substituted with the configured primary-key field name when an
/// index's field list is resolved against a concrete `Cache`.
pub const PK_PLACEHOLDER: &str = "\u{a0}pk\u{a0}";

const HOOK_PRIORITY: i32 = 50;

/// Static descriptor for a secondary (or primary-key) index.
#[derive(Debug, Clone)]
pub struct IndexDef {
    /// Deduplicated, lexicographically sorted field list. May contain
    /// [`PK_PLACEHOLDER`], substituted at resolution time.
    pub fields: Vec<String>,
    /// `None` means "applies to all namespaces".
    pub target_namespace: Option<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        fields.sort();
        fields.dedup();
        Self { fields, target_namespace: None, unique: false }
    }

    pub fn target(mut self, namespace: impl Into<String>) -> Self {
        self.target_namespace = Some(namespace.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// The built-in primary-key index: `fields = [PK_PLACEHOLDER]`, unique,
    /// applicable to every namespace.
    pub fn primary_key() -> Self {
        IndexDef::new([PK_PLACEHOLDER]).unique()
    }

    pub fn applies_to(&self, namespace: &str) -> bool {
        match &self.target_namespace {
            None => true,
            Some(ns) => ns == namespace,
        }
    }

    pub fn resolved_fields(&self, pk_field: &str) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| if f == PK_PLACEHOLDER { pk_field.to_string() } else { f.clone() })
            .collect()
    }
}

/// A registered index: its static descriptor plus the per-index lock
/// serializing the read-modify-write on its forward/reverse pair.
pub struct Index {
    pub def: IndexDef,
    lock: Mutex<()>,
}

impl Index {
    fn new(def: IndexDef) -> Self {
        Self { def, lock: Mutex::new(()) }
    }

    pub fn resolved_fields(&self, pk_field: &str) -> Vec<String> {
        self.def.resolved_fields(pk_field)
    }

    pub fn forward_namespace(&self, data_ns: &str, pk_field: &str) -> String {
        format!("{FORWARD_PREFIX}{data_ns}:{}", self.resolved_fields(pk_field).join("_"))
    }

    pub fn reverse_namespace(&self, data_ns: &str, pk_field: &str) -> String {
        format!("{REVERSE_PREFIX}{data_ns}:{}", self.resolved_fields(pk_field).join("_"))
    }

    /// Projects `entity` onto this index's resolved fields; missing fields
    /// map to `Value::Null` (preserved, not stripped, so "missing" and
    /// "present but null" are distinct keys).
    pub fn cut(&self, entity: &Entity, pk_field: &str) -> BTreeMap<String, Value> {
        self.resolved_fields(pk_field)
            .into_iter()
            .map(|f| {
                let v = entity.get(&f).cloned().unwrap_or(Value::Null);
                (f, v)
            })
            .collect()
    }

    /// Deterministic, field-order-independent encoding of a cut projection.
    /// `BTreeMap` already yields sorted-key serialization, so this is stable
    /// regardless of the order fields were declared in.
    pub fn encode_key(cut: &BTreeMap<String, Value>) -> String {
        serde_json::to_string(cut).expect("BTreeMap<String, Value> always serializes")
    }
}

/// Reserved namespace prefixes, documented so callers don't collide with them.
pub fn is_reserved_namespace(namespace: &str) -> bool {
    namespace.starts_with(FORWARD_PREFIX) || namespace.starts_with(REVERSE_PREFIX)
}

fn value_to_storage_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn entity_from_arg(v: Option<&Value>) -> CacheResult<Entity> {
    match v {
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Err(CacheError::store("expected an entity object in pipeline context")),
    }
}

/// Registers indexes for a `Cache` instance. Owned by the cache rather than
/// being a hidden process-wide global, per spec.md §9's design note.
#[derive(Default)]
pub struct IndexRegistry {
    indexes: Mutex<Vec<Arc<Index>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `def`, wiring its maintenance hooks onto `pipelines`.
    pub fn register(
        &self,
        def: IndexDef,
        store: Arc<dyn Store>,
        pipelines: Arc<PipelineManager>,
        pk_field: String,
    ) -> Arc<Index> {
        let index = Arc::new(Index::new(def));
        attach_hooks(index.clone(), store, pipelines, pk_field);
        self.indexes.lock().push(index.clone());
        index
    }

    /// Indexes applicable to `namespace`, in registration order.
    pub fn applicable(&self, namespace: &str) -> Vec<Arc<Index>> {
        self.indexes.lock().iter().filter(|idx| idx.def.applies_to(namespace)).cloned().collect()
    }
}

// --- pipelined store helpers for index bookkeeping -------------------------
// index_get/index_set/index_delete wrap the index's own store interactions so
// observers can hook them without recursing into the Cache's set/get/update/
// delete hooks, per spec.md §4.6.

fn pipelined_get(pipelines: &PipelineManager, store: &dyn Store, ns: &str, key: &str, default: Value) -> CacheResult<Value> {
    let mut ctx = Context::new(ns, vec![Value::String(key.to_string()), default.clone()]);
    pipelines.run("index_get", &mut ctx, |ctx| {
        let k = ctx.arg(0).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let d = ctx.arg(1).cloned().unwrap_or(Value::Null);
        let ns = ctx.namespace.clone();
        ctx.result = Some(store.get(&ns, &k, d));
        Ok(())
    })?;
    Ok(ctx.result.unwrap_or(default))
}

fn pipelined_set(pipelines: &PipelineManager, store: &dyn Store, ns: &str, key: &str, value: Value) -> CacheResult<()> {
    let mut ctx = Context::new(ns, vec![Value::String(key.to_string()), value]);
    pipelines.run("index_set", &mut ctx, |ctx| {
        let k = ctx.arg(0).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let v = ctx.arg(1).cloned().unwrap_or(Value::Null);
        let ns = ctx.namespace.clone();
        store.set(&ns, &k, v);
        ctx.result = Some(Value::Null);
        Ok(())
    })
}

fn pipelined_delete(pipelines: &PipelineManager, store: &dyn Store, ns: &str, key: &str) -> CacheResult<()> {
    let mut ctx = Context::new(ns, vec![Value::String(key.to_string())]);
    pipelines.run("index_delete", &mut ctx, |ctx| {
        let k = ctx.arg(0).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let ns = ctx.namespace.clone();
        let _ = store.delete(&ns, &k);
        ctx.result = Some(Value::Null);
        Ok(())
    })
}

fn pipelined_pop(pipelines: &PipelineManager, store: &dyn Store, ns: &str, key: &str, default: Value) -> CacheResult<Value> {
    let mut ctx = Context::new(ns, vec![Value::String(key.to_string()), default.clone()]);
    pipelines.run("index_delete", &mut ctx, |ctx| {
        let k = ctx.arg(0).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let d = ctx.arg(1).cloned().unwrap_or(Value::Null);
        let ns = ctx.namespace.clone();
        ctx.result = Some(store.pop(&ns, &k, d));
        Ok(())
    })?;
    Ok(ctx.result.unwrap_or(default))
}

/// Inserts `entity`'s PK into the forward bucket for its encoded key
/// (unioning with whatever PKs are already there) and records the key in
/// the reverse map.
fn append(
    pipelines: &PipelineManager,
    store: &dyn Store,
    index: &Index,
    data_ns: &str,
    pk_field: &str,
    entity: &Entity,
) -> CacheResult<()> {
    let _guard = index.lock.lock();
    let cut = index.cut(entity, pk_field);
    let key = Index::encode_key(&cut);
    let pk = entity.get(pk_field).cloned().unwrap_or(Value::Null);
    let fwd_ns = index.forward_namespace(data_ns, pk_field);
    let rev_ns = index.reverse_namespace(data_ns, pk_field);

    let mut pk_set = pipelined_get(pipelines, store, &fwd_ns, &key, Value::Array(vec![]))?
        .as_array()
        .cloned()
        .unwrap_or_default();
    if !pk_set.contains(&pk) {
        pk_set.push(pk.clone());
    }
    pipelined_set(pipelines, store, &fwd_ns, &key, Value::Array(pk_set))?;
    pipelined_set(pipelines, store, &rev_ns, &value_to_storage_key(&pk), Value::String(key))?;
    Ok(())
}

/// Removes only `entity`'s own PK from its forward bucket, deleting the
/// bucket only once it becomes empty. Corrected per spec.md §9 (the
/// original discards the whole bucket).
fn remove(
    pipelines: &PipelineManager,
    store: &dyn Store,
    index: &Index,
    data_ns: &str,
    pk_field: &str,
    entity: &Entity,
) -> CacheResult<()> {
    let _guard = index.lock.lock();
    let pk = entity.get(pk_field).cloned().unwrap_or(Value::Null);
    let pk_key = value_to_storage_key(&pk);
    let fwd_ns = index.forward_namespace(data_ns, pk_field);
    let rev_ns = index.reverse_namespace(data_ns, pk_field);

    let encoded_key = pipelined_pop(pipelines, store, &rev_ns, &pk_key, Value::Null)?;
    let Value::String(key) = encoded_key else { return Ok(()) };

    let mut pk_set = pipelined_get(pipelines, store, &fwd_ns, &key, Value::Array(vec![]))?
        .as_array()
        .cloned()
        .unwrap_or_default();
    pk_set.retain(|v| v != &pk);
    if pk_set.is_empty() {
        pipelined_delete(pipelines, store, &fwd_ns, &key)?;
    } else {
        pipelined_set(pipelines, store, &fwd_ns, &key, Value::Array(pk_set))?;
    }
    Ok(())
}

fn attach_hooks(index: Arc<Index>, store: Arc<dyn Store>, pipelines: Arc<PipelineManager>, pk_field: String) {
    let target = index.def.target_namespace.clone();

    {
        let index = index.clone();
        let store = store.clone();
        let pipelines = pipelines.clone();
        let pk_field = pk_field.clone();
        pipelines.add_before(
            "set",
            Action::new(HOOK_PRIORITY, target.clone(), move |ctx| {
                let entity = entity_from_arg(ctx.arg(0))?;
                ctx.scratch_set("value", Value::Object(entity.clone()));
                if !index.def.unique {
                    return Ok(());
                }
                let cut = index.cut(&entity, &pk_field);
                let key = Index::encode_key(&cut);
                let fwd_ns = index.forward_namespace(&ctx.namespace, &pk_field);
                let existing = pipelined_get(&pipelines, store.as_ref(), &fwd_ns, &key, Value::Array(vec![]))?;
                let existing_pks = existing.as_array().cloned().unwrap_or_default();
                let incoming_pk = entity.get(&pk_field).cloned().unwrap_or(Value::Null);
                let is_replacement = existing_pks.len() == 1 && existing_pks[0] == incoming_pk;
                if !existing_pks.is_empty() && !is_replacement {
                    return Err(CacheError::unique_violation(
                        ctx.namespace.clone(),
                        format!(
                            "unique index on {:?} already has an entry for key {key}",
                            index.resolved_fields(&pk_field)
                        ),
                    ));
                }
                Ok(())
            }),
        );
    }

    {
        let index = index.clone();
        let store = store.clone();
        let pipelines = pipelines.clone();
        let pk_field = pk_field.clone();
        pipelines.add_after(
            "set",
            Action::new(HOOK_PRIORITY, target.clone(), move |ctx| {
                let entity = match ctx.scratch_get("value") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => entity_from_arg(ctx.arg(0))?,
                };
                append(&pipelines, store.as_ref(), &index, &ctx.namespace, &pk_field, &entity)
            }),
        );
    }

    {
        let store = store.clone();
        pipelines.add_before(
            "delete",
            Action::new(HOOK_PRIORITY, target.clone(), move |ctx| {
                let key = ctx.arg(0).and_then(|v| v.as_str()).unwrap_or_default().to_string();
                // Read via the store directly, not the Cache facade, to avoid recursive hook firing.
                let raw = store.get(&ctx.namespace, &key, Value::Null);
                ctx.scratch_set("value", raw);
                Ok(())
            }),
        );
    }

    {
        let index = index.clone();
        let store = store.clone();
        let pipelines = pipelines.clone();
        let pk_field = pk_field.clone();
        pipelines.add_after(
            "delete",
            Action::new(HOOK_PRIORITY, target.clone(), move |ctx| match ctx.scratch_get("value").cloned() {
                Some(Value::Object(entity)) => {
                    remove(&pipelines, store.as_ref(), &index, &ctx.namespace, &pk_field, &entity)
                }
                _ => Ok(()),
            }),
        );
    }

    {
        let store = store.clone();
        let pk_field = pk_field.clone();
        pipelines.add_before(
            "update",
            Action::new(HOOK_PRIORITY, target.clone(), move |ctx| {
                let incoming = entity_from_arg(ctx.arg(0))?;
                let pk = incoming.get(&pk_field).cloned().ok_or_else(|| CacheError::missing_primary_key(pk_field.clone()))?;
                let key = value_to_storage_key(&pk);
                let old = store.get(&ctx.namespace, &key, Value::Null);
                ctx.scratch_set("old_value", old);
                Ok(())
            }),
        );
    }

    {
        let index = index.clone();
        let store = store.clone();
        let pipelines = pipelines.clone();
        let pk_field = pk_field.clone();
        pipelines.add_after(
            "update",
            Action::new(HOOK_PRIORITY, target.clone(), move |ctx| {
                let incoming = entity_from_arg(ctx.arg(0))?;
                let pk = incoming.get(&pk_field).cloned().ok_or_else(|| CacheError::missing_primary_key(pk_field.clone()))?;
                let key = value_to_storage_key(&pk);
                let new_entity = match store.get(&ctx.namespace, &key, Value::Null) {
                    Value::Object(map) => map,
                    _ => incoming.clone(),
                };
                if let Some(Value::Object(old_entity)) = ctx.scratch_get("old_value").cloned() {
                    let old_cut = index.cut(&old_entity, &pk_field);
                    let new_cut = index.cut(&new_entity, &pk_field);
                    if Index::encode_key(&old_cut) == Index::encode_key(&new_cut) {
                        return Ok(());
                    }
                    remove(&pipelines, store.as_ref(), &index, &ctx.namespace, &pk_field, &old_entity)?;
                }
                append(&pipelines, store.as_ref(), &index, &ctx.namespace, &pk_field, &new_entity)
            }),
        );
    }
}
