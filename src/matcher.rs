//! Conjunctive query matcher.
//! Grounded directly on `ihashmap.helpers.match_query`: every `(field,
//! query_value)` pair in the query must hold against the entity, with a
//! missing field read as `null`/`None`. An empty query always matches.

use crate::value::{Entity, Query};

/// Returns true iff every constraint in `query` holds against `entity`.
pub fn match_entity(entity: &Entity, query: &Query) -> bool {
    query.iter().all(|(field, qv)| qv.matches(entity.get(field)))
}
