//! Nested query results to flat records.
//!
//! Query collaborators return relationship-valued fields as nested objects.
//! [`flatten`] joins nested keys with `_`; [`reshape`] then maps the requested
//! (dotted) field list onto the flat record, producing exactly the requested
//! columns in requested order.

use serde_json::Value;

use tdm_core::{FieldValue, NestedRecord, Record};

const SEPARATOR: char = '_';

/// Recursively flatten nested maps, e.g. `{Parent: {Id: 'x'}}` → `{Parent_Id: 'x'}`.
///
/// An empty nested map contributes no keys; a null relationship stays a single
/// null-valued key.
pub fn flatten(nested: &NestedRecord) -> Record {
    let mut flat = Vec::new();
    for (key, value) in nested {
        flatten_into(key, value, &mut flat);
    }
    flat.into_iter().collect()
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, FieldValue)>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                flatten_into(&format!("{prefix}{SEPARATOR}{key}"), inner, out);
            }
        }
        scalar => out.push((prefix.to_string(), FieldValue::from_json(scalar))),
    }
}

/// Build the record handed to batching from a flattened record.
///
/// Each requested field is looked up verbatim, then in its underscore
/// (flattened) form for dotted references. Fields that cannot be found are
/// emitted as null so every record of a batch carries the same columns;
/// everything not requested is dropped.
pub fn reshape(flat: &Record, fields: &[String]) -> Record {
    fields
        .iter()
        .map(|field| {
            let value = flat
                .get(field)
                .or_else(|| {
                    field
                        .contains('.')
                        .then(|| flat.get(&field.replace('.', "_")))
                        .flatten()
                })
                .cloned()
                .unwrap_or(FieldValue::Null);
            (field.as_str(), value)
        })
        .collect()
}

/// Flatten then reshape a batch of query results.
pub fn flatten_records(nested: &[NestedRecord], fields: &[String]) -> Vec<Record> {
    nested
        .iter()
        .map(|record| reshape(&flatten(record), fields))
        .collect()
}
