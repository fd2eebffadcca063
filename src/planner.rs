//! Conjunctive-query planner: picks which registered indexes to consult for
//! a `search`, probes them, and falls back to a full scan when none cover
//! the query.
//!
//! Grounded on `examples/original_source/ihashmap/index.py::Index.combine`:
//! candidate indexes are those whose full field list is covered by the
//! query; they are greedy-selected by descending field count, skipping any
//! whose fields are already covered by a previously chosen index. Each
//! selected index contributes a PK set (a direct forward-map lookup when
//! every one of its fields is constrained by a literal, otherwise an
//! enumerate-and-filter over its forward map, since an index key cannot be
//! computed from a predicate). Conjunctive semantics intersect the
//! per-index PK sets. A final full match against the original query both
//! double-checks the indexed fields and applies any residual (non-indexed)
//! constraints before the result set is sorted by primary key.

use crate::index::{Index, IndexRegistry};
use crate::matcher::match_entity;
use crate::store::Store;
use crate::value::{Entity, Query, QueryValue};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

fn pk_sort_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Picks the indexes to consult, greedily covering as many query fields as
/// possible, most-specific first. Only indexes whose full field list is a
/// subset of the query's fields are eligible — a partial match would need a
/// residual scan anyway, which the full-scan path already provides.
fn select_indexes(candidates: Vec<Arc<Index>>, query: &Query, pk_field: &str) -> (Vec<Arc<Index>>, BTreeSet<String>) {
    let query_fields: BTreeSet<&String> = query.keys().collect();
    let mut eligible: Vec<(Arc<Index>, Vec<String>)> = candidates
        .into_iter()
        .filter_map(|idx| {
            let fields = idx.resolved_fields(pk_field);
            if !fields.is_empty() && fields.iter().all(|f| query_fields.contains(f)) {
                Some((idx, fields))
            } else {
                None
            }
        })
        .collect();
    eligible.sort_by(|(_, a), (_, b)| b.len().cmp(&a.len()));

    let mut covered = BTreeSet::new();
    let mut used = Vec::new();
    for (idx, fields) in eligible {
        if fields.iter().all(|f| covered.contains(f)) {
            continue;
        }
        covered.extend(fields);
        used.push(idx);
    }
    (used, covered)
}

/// The PK set an index contributes for `query`, restricted to its own
/// fields. Uses a direct forward-map lookup when every one of the index's
/// fields is constrained by a literal; otherwise enumerates the forward map
/// and filters by decoding each key back into its field projection.
fn probe_index(store: &dyn Store, index: &Index, namespace: &str, pk_field: &str, query: &Query) -> HashSet<Value> {
    let fields = index.resolved_fields(pk_field);
    let forward_ns = index.forward_namespace(namespace, pk_field);

    let all_literal = fields.iter().all(|f| matches!(query.get(f), Some(QueryValue::Literal(_))));
    if all_literal {
        let cut: BTreeMap<String, Value> = fields
            .iter()
            .map(|f| {
                let v = match query.get(f) {
                    Some(QueryValue::Literal(v)) => v.clone(),
                    _ => Value::Null,
                };
                (f.clone(), v)
            })
            .collect();
        let key = Index::encode_key(&cut);
        let pks = store.get(&forward_ns, &key, Value::Array(vec![]));
        return pks.as_array().cloned().unwrap_or_default().into_iter().collect();
    }

    let mut matched = HashSet::new();
    for key in store.keys(&forward_ns) {
        let Ok(cut) = serde_json::from_str::<BTreeMap<String, Value>>(&key) else { continue };
        let satisfies = fields.iter().all(|f| {
            let field_value = cut.get(f);
            match query.get(f) {
                Some(qv) => qv.matches(field_value),
                None => true,
            }
        });
        if !satisfies {
            continue;
        }
        let pks = store.get(&forward_ns, &key, Value::Array(vec![]));
        matched.extend(pks.as_array().cloned().unwrap_or_default());
    }
    matched
}

fn intersect_all(sets: Vec<HashSet<Value>>) -> HashSet<Value> {
    let mut iter = sets.into_iter();
    let Some(first) = iter.next() else { return HashSet::new() };
    iter.fold(first, |acc, next| acc.into_iter().filter(|v| next.contains(v)).collect())
}

fn fetch_entity(store: &dyn Store, namespace: &str, pk: &Value) -> Option<Entity> {
    match store.get(namespace, &pk_sort_key(pk), Value::Null) {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Runs a conjunctive query over `namespace`, returning matching entities
/// sorted ascending by primary key.
pub fn search(store: &dyn Store, registry: &IndexRegistry, namespace: &str, pk_field: &str, query: &Query) -> Vec<Entity> {
    let applicable = registry.applicable(namespace);
    let (used, _covered) = select_indexes(applicable, query, pk_field);

    let mut candidate_pks: Option<HashSet<Value>> = None;
    if used.is_empty() {
        tracing::warn!(namespace, fields = ?query.keys().collect::<Vec<_>>(), "no index covers query, falling back to full scan");
    } else {
        let per_index: Vec<HashSet<Value>> =
            used.iter().map(|idx| probe_index(store, idx, namespace, pk_field, query)).collect();
        candidate_pks = Some(intersect_all(per_index));
    }

    let mut results: Vec<Entity> = match candidate_pks {
        Some(pks) => pks
            .into_iter()
            .filter_map(|pk| fetch_entity(store, namespace, &pk))
            .filter(|entity| match_entity(entity, query))
            .collect(),
        None => store
            .keys(namespace)
            .into_iter()
            .filter_map(|key| match store.get(namespace, &key, Value::Null) {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .filter(|entity| match_entity(entity, query))
            .collect(),
    };

    results.sort_by(|a, b| {
        let ka = a.get(pk_field).map(pk_sort_key).unwrap_or_default();
        let kb = b.get(pk_field).map(pk_sort_key).unwrap_or_default();
        ka.cmp(&kb)
    });
    results
}
