//! Entity and query-value types.
//! An entity is treated as an opaque mapping from field name to value; the
//! core only ever looks inside it by name during index maintenance and query
//! matching. `serde_json::Value` is reused as the field-value type rather
//! than inventing a bespoke one, the way the teacher's own KV layer stores
//! opaque JSON values (`KvValue::Json`).

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// An opaque mapping from field name to value. Must contain the configured
/// primary-key field on `set`/`update`.
pub type Entity = Map<String, Value>;

/// A query constrains a field to either an equality literal or a unary
/// predicate over that field's value (`None` when the field is absent).
#[derive(Clone)]
pub enum QueryValue {
    Literal(Value),
    Predicate(Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>),
}

impl QueryValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        QueryValue::Literal(value.into())
    }

    pub fn predicate(f: impl Fn(Option<&Value>) -> bool + Send + Sync + 'static) -> Self {
        QueryValue::Predicate(Arc::new(f))
    }

    pub fn is_predicate(&self) -> bool {
        matches!(self, QueryValue::Predicate(_))
    }

    /// Evaluate this query value against a field value (`None` if the field
    /// is absent from the entity).
    pub fn matches(&self, field_value: Option<&Value>) -> bool {
        match self {
            QueryValue::Literal(expected) => field_value == Some(expected),
            QueryValue::Predicate(f) => f(field_value),
        }
    }
}

impl fmt::Debug for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Literal(v) => write!(f, "Literal({v})"),
            QueryValue::Predicate(_) => write!(f, "Predicate(<fn>)"),
        }
    }
}

impl From<Value> for QueryValue {
    fn from(value: Value) -> Self {
        QueryValue::Literal(value)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Literal(Value::String(value.to_string()))
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::Literal(Value::from(value))
    }
}

/// A conjunctive query: every `(field, query_value)` pair must match.
pub type Query = std::collections::BTreeMap<String, QueryValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_matches_equal_value_only() {
        let qv = QueryValue::literal(1i64);
        assert!(qv.matches(Some(&Value::from(1))));
        assert!(!qv.matches(Some(&Value::from(2))));
        assert!(!qv.matches(None));
    }

    #[test]
    fn predicate_receives_none_for_missing_field() {
        let qv = QueryValue::predicate(|v| v.is_none());
        assert!(qv.matches(None));
        assert!(!qv.matches(Some(&Value::from(1))));
    }
}
