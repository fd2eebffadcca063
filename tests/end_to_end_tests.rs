//! End-to-end scenarios, grounded on spec.md §8's worked examples. Uses the
//! default PK field (`_id`) and the in-memory reference store throughout.

use indexed_cache::{Cache, CacheErrorKind, IndexDef, Query, QueryValue};
use serde_json::{json, Value};

fn entity(pairs: &[(&str, Value)]) -> indexed_cache::Entity {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn basic_set_and_get() {
    let cache = Cache::in_memory();
    cache.set("users", entity(&[("_id", json!("1")), ("model", json!(1))])).unwrap();

    assert_eq!(cache.get("users", "1", Value::Null).unwrap(), json!({"_id": "1", "model": 1}));
    assert_eq!(cache.get("users", "2", Value::Null).unwrap(), Value::Null);
}

#[test]
fn search_with_single_secondary_index() {
    let cache = Cache::in_memory();
    cache.register_index(IndexDef::new(["model"]).target("users"));

    cache.set("users", entity(&[("_id", json!("a")), ("model", json!(1))])).unwrap();
    cache.set("users", entity(&[("_id", json!("b")), ("model", json!(1))])).unwrap();
    cache.set("users", entity(&[("_id", json!("c")), ("model", json!(2))])).unwrap();

    let mut query = Query::new();
    query.insert("model".into(), QueryValue::literal(1i64));
    let results = cache.search("users", &query);

    let ids: Vec<_> = results.iter().map(|e| e["_id"].as_str().unwrap().to_string()).collect();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn multi_index_combine() {
    let cache = Cache::in_memory();
    cache.register_index(IndexDef::new(["model"]).target("items"));
    cache.register_index(IndexDef::new(["release"]).target("items"));

    cache
        .set("items", entity(&[("_id", json!("x")), ("model", json!(1)), ("release", json!("1.0"))]))
        .unwrap();
    cache
        .set("items", entity(&[("_id", json!("y")), ("model", json!(1)), ("release", json!("2.0"))]))
        .unwrap();

    let mut query = Query::new();
    query.insert("model".into(), QueryValue::literal(1i64));
    query.insert("release".into(), QueryValue::literal("2.0"));
    let results = cache.search("items", &query);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["_id"], "y");
}

#[test]
fn predicate_probe_enumerates_index() {
    let cache = Cache::in_memory();
    cache.register_index(IndexDef::new(["model"]).target("users"));

    cache.set("users", entity(&[("_id", json!("a")), ("model", json!(1))])).unwrap();
    cache.set("users", entity(&[("_id", json!("b")), ("model", json!(1))])).unwrap();
    cache.set("users", entity(&[("_id", json!("c")), ("model", json!(2))])).unwrap();

    let mut query = Query::new();
    query.insert(
        "model".into(),
        QueryValue::predicate(|v| matches!(v, Some(Value::Number(n)) if n.as_i64() == Some(1) || n.as_i64() == Some(3))),
    );
    let results = cache.search("users", &query);

    let ids: Vec<_> = results.iter().map(|e| e["_id"].as_str().unwrap().to_string()).collect();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn unique_violation_leaves_existing_entity_searchable() {
    let cache = Cache::in_memory();
    cache.register_index(IndexDef::new(["email"]).target("accounts").unique());

    cache.set("accounts", entity(&[("_id", json!("1")), ("email", json!("x@y"))])).unwrap();
    let err = cache
        .set("accounts", entity(&[("_id", json!("2")), ("email", json!("x@y"))]))
        .unwrap_err();
    assert_eq!(err.kind(), CacheErrorKind::UniqueViolation);

    // The failed write never reached the store.
    assert_eq!(cache.get("accounts", "2", json!("absent")).unwrap(), json!("absent"));

    let mut query = Query::new();
    query.insert("email".into(), QueryValue::literal("x@y"));
    let results = cache.search("accounts", &query);
    let ids: Vec<_> = results.iter().map(|e| e["_id"].as_str().unwrap().to_string()).collect();
    assert_eq!(ids, vec!["1".to_string()]);
}

#[test]
fn update_rekeys_index() {
    let cache = Cache::in_memory();
    cache.register_index(IndexDef::new(["model"]).target("products"));

    cache.set("products", entity(&[("_id", json!("1")), ("model", json!(1))])).unwrap();
    cache
        .update("products", entity(&[("_id", json!("1")), ("model", json!(2))]), None)
        .unwrap();

    let mut q_old = Query::new();
    q_old.insert("model".into(), QueryValue::literal(1i64));
    assert!(cache.search("products", &q_old).is_empty());

    let mut q_new = Query::new();
    q_new.insert("model".into(), QueryValue::literal(2i64));
    let results = cache.search("products", &q_new);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["_id"], "1");
}

#[test]
fn empty_query_returns_everything_sorted_by_pk() {
    let cache = Cache::in_memory();
    cache.set("users", entity(&[("_id", json!("3"))])).unwrap();
    cache.set("users", entity(&[("_id", json!("1"))])).unwrap();
    cache.set("users", entity(&[("_id", json!("2"))])).unwrap();

    let results = cache.search("users", &Query::new());
    let ids: Vec<_> = results.iter().map(|e| e["_id"].as_str().unwrap().to_string()).collect();
    assert_eq!(ids, vec!["1".to_string(), "2".to_string(), "3".to_string()]);
}

#[test]
fn query_fields_uncovered_by_any_index_fall_back_to_full_scan() {
    let cache = Cache::in_memory();
    // No index declared on "nickname" at all.
    cache.set("users", entity(&[("_id", json!("1")), ("nickname", json!("al"))])).unwrap();
    cache.set("users", entity(&[("_id", json!("2")), ("nickname", json!("bo"))])).unwrap();

    let mut query = Query::new();
    query.insert("nickname".into(), QueryValue::literal("bo"));
    let results = cache.search("users", &query);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["_id"], "2");
}

#[test]
fn pk_only_query_uses_pk_index_without_full_scan() {
    // A secondary index with no bearing on "_id" is present purely to prove
    // the planner still picks the built-in PK index over it.
    let cache = Cache::in_memory();
    cache.register_index(IndexDef::new(["model"]).target("users"));
    cache.set("users", entity(&[("_id", json!("1")), ("model", json!(7))])).unwrap();
    cache.set("users", entity(&[("_id", json!("2")), ("model", json!(7))])).unwrap();

    let mut query = Query::new();
    query.insert("_id".into(), QueryValue::literal("2"));
    let results = cache.search("users", &query);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["model"], 7);
}

#[test]
fn delete_then_set_allows_reusing_a_unique_key() {
    let cache = Cache::in_memory();
    cache.register_index(IndexDef::new(["email"]).target("accounts").unique());

    cache.set("accounts", entity(&[("_id", json!("1")), ("email", json!("x@y"))])).unwrap();
    cache.delete("accounts", "1").unwrap();
    cache.set("accounts", entity(&[("_id", json!("2")), ("email", json!("x@y"))])).unwrap();

    assert_eq!(cache.get("accounts", "2", Value::Null).unwrap()["email"], "x@y");
}

#[test]
fn search_matches_filtering_all_by_the_same_query() {
    let cache = Cache::in_memory();
    cache.register_index(IndexDef::new(["model"]).target("users"));
    for (id, model, active) in [("a", 1, true), ("b", 1, false), ("c", 2, true)] {
        cache
            .set("users", entity(&[("_id", json!(id)), ("model", json!(model)), ("active", json!(active))]))
            .unwrap();
    }

    let mut query = Query::new();
    query.insert("model".into(), QueryValue::literal(1i64));
    query.insert("active".into(), QueryValue::literal(true));

    let via_search = cache.search("users", &query);
    let mut via_scan: Vec<_> = cache
        .all("users")
        .into_iter()
        .filter(|e| indexed_cache::matcher::match_entity(e, &query))
        .collect();
    via_scan.sort_by(|a, b| a["_id"].as_str().cmp(&b["_id"].as_str()));

    assert_eq!(via_search, via_scan);
}
