//! Elasticsearch query DSL construction.
//!
//! Filters on a user-facing field become a `should` across that field's
//! storage fallback chain (minimum_should_match 1), so documents indexed
//! under any layout match. Projections expand to the union of the chains.

use serde_json::{Value, json};

use talon_backends::fieldmap::FieldMap;

use crate::params::FieldFilter;
use crate::timerange::ResolvedRange;

/// Build the `query` body for a search within a window.
#[must_use]
pub(crate) fn build_query(
    filters: &[FieldFilter],
    range: ResolvedRange,
    map: &FieldMap,
) -> Value {
    let mut must: Vec<Value> = vec![json!({
        "range": {
            "@timestamp": {
                "gte": range.start.to_rfc3339(),
                "lt": range.end.to_rfc3339(),
            }
        }
    })];

    for filter in filters {
        must.push(filter_clause(filter, map));
    }

    json!({ "bool": { "must": must } })
}

/// One filter as a should-across-fallbacks clause.
fn filter_clause(filter: &FieldFilter, map: &FieldMap) -> Value {
    let chain = map
        .storage_chain(&filter.field)
        .map(<[String]>::to_vec)
        .unwrap_or_else(|| vec![filter.field.clone()]);

    let should: Vec<Value> = chain
        .iter()
        .map(|storage| term_clause(storage, &filter.value))
        .collect();

    json!({ "bool": { "should": should, "minimum_should_match": 1 } })
}

/// `{"term": {<storage>: value}}`, or `terms` for array values.
fn term_clause(storage: &str, value: &Value) -> Value {
    let mut inner = serde_json::Map::new();
    inner.insert(storage.to_owned(), value.clone());
    if value.is_array() {
        json!({ "terms": inner })
    } else {
        json!({ "term": inner })
    }
}

/// Expand user-facing projection names into storage names for `_source`.
#[must_use]
pub(crate) fn storage_projection(fields: &[String], map: &FieldMap) -> Vec<String> {
    let mut storage = Vec::new();
    for field in fields {
        if let Some(chain) = map.storage_chain(field) {
            for name in chain {
                if !storage.contains(name) {
                    storage.push(name.clone());
                }
            }
        }
    }
    storage
}

/// Build a seed-expansion query: the indicator matched against every
/// related-field chain it could appear in.
#[must_use]
pub(crate) fn build_indicator_query(
    indicator: &str,
    related_fields: &[&str],
    range: ResolvedRange,
    map: &FieldMap,
) -> Value {
    let indicator_value = Value::from(indicator);
    let mut should = Vec::new();
    for field in related_fields {
        if let Some(chain) = map.storage_chain(field) {
            for storage in chain {
                should.push(term_clause(storage, &indicator_value));
            }
        }
    }
    json!({
        "bool": {
            "must": [{
                "range": {
                    "@timestamp": {
                        "gte": range.start.to_rfc3339(),
                        "lt": range.end.to_rfc3339(),
                    }
                }
            }],
            "should": should,
            "minimum_should_match": 1,
        }
    })
}
