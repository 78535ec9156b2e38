//! Tool-argument parsing into typed query parameters.

use serde_json::Value;

use talon_backends::fieldmap::FieldMap;
use talon_core::{FieldError, ServerError, ServerResult};

use crate::timerange::TimeRange;

/// One field filter (term match; an array value becomes a terms match).
#[derive(Debug, Clone)]
pub struct FieldFilter {
    /// User-facing field name (already verified against the map).
    pub field: String,
    /// The value(s) to match.
    pub value: Value,
}

/// Parsed parameters for a search or stream.
#[derive(Debug, Clone)]
pub struct QueryParams {
    /// The requested time range.
    pub time_range: TimeRange,
    /// Term filters on mapped fields.
    pub filters: Vec<FieldFilter>,
    /// Projection in user-facing names (`None` = full documents).
    pub fields: Option<Vec<String>>,
    /// Requested page size.
    pub page_size: Option<usize>,
    /// Offset pagination start.
    pub from: Option<usize>,
    /// Resume cursor for cursor pagination.
    pub cursor: Option<String>,
}

impl QueryParams {
    /// Parse and verify tool arguments.
    ///
    /// Unknown field names fail with a validation error carrying the
    /// suggested canonical name — never a silently empty result.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing every unknown field.
    pub fn from_args(args: &Value, map: &FieldMap) -> ServerResult<Self> {
        let time_range = TimeRange::from_args(args)?;

        let mut bad_fields = Vec::new();
        let mut filters = Vec::new();
        if let Some(filter_obj) = args.get("filters").and_then(Value::as_object) {
            for (field, value) in filter_obj {
                if map.contains(field) {
                    filters.push(FieldFilter {
                        field: field.clone(),
                        value: value.clone(),
                    });
                } else {
                    bad_fields.push(unknown_field(map, &format!("filters.{field}"), field));
                }
            }
        }

        let fields = match args.get("fields").and_then(Value::as_array) {
            Some(list) => {
                let mut names = Vec::with_capacity(list.len());
                for entry in list {
                    let Some(name) = entry.as_str() else {
                        bad_fields.push(FieldError::new("fields", "entries must be strings"));
                        continue;
                    };
                    if map.contains(name) {
                        names.push(name.to_owned());
                    } else {
                        bad_fields.push(unknown_field(map, "fields", name));
                    }
                }
                Some(names)
            },
            None => None,
        };

        if !bad_fields.is_empty() {
            return Err(ServerError::Validation { fields: bad_fields });
        }

        let page_size = args
            .get("page_size")
            .and_then(Value::as_u64)
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX));
        let from = args
            .get("from")
            .and_then(Value::as_u64)
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX));
        let cursor = args
            .get("cursor")
            .and_then(Value::as_str)
            .map(str::to_owned);

        if from.is_some() && cursor.is_some() {
            return Err(ServerError::validation(
                "cursor",
                "offset (from) and cursor pagination are mutually exclusive",
            ));
        }

        Ok(Self {
            time_range,
            filters,
            fields,
            page_size,
            from,
            cursor,
        })
    }
}

fn unknown_field(map: &FieldMap, path: &str, name: &str) -> FieldError {
    let error = FieldError::new(path, format!("unknown field '{name}'"));
    match map.suggest(name) {
        Some(suggestion) => error.with_suggestion(suggestion),
        None => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_filters_parse() {
        let map = FieldMap::dshield();
        let params = QueryParams::from_args(
            &json!({
                "filters": { "source_ip": "141.98.80.121", "destination_port": [22, 2222] },
                "fields": ["timestamp", "source_ip"],
                "page_size": 50,
            }),
            &map,
        )
        .unwrap();
        assert_eq!(params.filters.len(), 2);
        assert_eq!(params.fields.as_deref().unwrap().len(), 2);
        assert_eq!(params.page_size, Some(50));
    }

    #[test]
    fn test_unknown_filter_field_suggests_canonical() {
        let map = FieldMap::dshield();
        let err = QueryParams::from_args(
            &json!({ "filters": { "source.ip": "1.2.3.4" } }),
            &map,
        )
        .unwrap_err();
        let data = err.data();
        assert_eq!(data["fields"][0]["suggestion"], "source_ip");
    }

    #[test]
    fn test_cursor_and_offset_conflict() {
        let map = FieldMap::dshield();
        let err = QueryParams::from_args(
            &json!({ "from": 10, "cursor": "abc" }),
            &map,
        )
        .unwrap_err();
        assert_eq!(err.code().code(), -32004);
    }
}
