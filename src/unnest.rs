//! Unnesting of JSON objects-of-objects into flat frames.
//!
//! Report payloads nest records two ways: `{id: {field: value}}` for one row per key, and a
//! per-row cell holding `{instance: {field: value}}` for repeated instruments. The second form is
//! exploded into long `(parent row, instance, field, value)` entries and then widened back out
//! over the union of field names.

use crate::frame_utils::{cell, frame_from_records, text_column, Record};
use crate::{errors::DatastoreError, Result};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One field value of one instance, in long form.
#[derive(Debug, Clone, PartialEq)]
pub struct LongEntry {
    pub parent: usize,
    pub instance: String,
    pub field: String,
    pub value: Value,
}

pub struct Unnester;

impl Unnester {
    /// One row per outer key: `index_name` holds the key, followed by the union of inner fields.
    /// Nested values are kept as JSON text.
    pub fn object_of_objects(map: &Map<String, Value>, index_name: &str) -> Result<DataFrame> {
        let mut records = Vec::with_capacity(map.len());
        for (key, value) in map {
            let inner = value.as_object().ok_or_else(|| {
                DatastoreError::ParseError(format!("Expected an object for key {}", key))
            })?;
            let mut record = Record::new();
            record.insert(index_name.to_string(), Value::String(key.clone()));
            for (field, v) in inner {
                record.insert(field.clone(), v.clone());
            }
            records.push(record);
        }
        frame_from_records(&records)
    }

    /// Explode a text column of `{instance: {field: value}}` JSON into long entries.
    /// Null cells contribute nothing.
    pub fn explode_long(column: &Column) -> Result<Vec<LongEntry>> {
        let name = column.name().as_str();
        let mut entries = Vec::new();
        for (parent, text) in column.str()?.iter().enumerate() {
            let Some(text) = text else { continue };
            let instances: Value = serde_json::from_str(text).map_err(|_| {
                DatastoreError::ParseError(format!(
                    "Expected an object of instances in {} at row {}",
                    name, parent
                ))
            })?;
            let instances = instances.as_object().ok_or_else(|| {
                DatastoreError::ParseError(format!(
                    "Expected an object of instances in {} at row {}",
                    name, parent
                ))
            })?;
            for (instance, fields) in instances {
                let fields = fields.as_object().ok_or_else(|| {
                    DatastoreError::ParseError(format!(
                        "Expected an object of fields for instance {} in {}",
                        instance, name
                    ))
                })?;
                for (field, value) in fields {
                    entries.push(LongEntry {
                        parent,
                        instance: instance.clone(),
                        field: field.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
        Ok(entries)
    }

    /// Widen long entries to one row per (parent, instance).
    ///
    /// Leading columns are `id_cols` copied from `parents` (null when absent) and
    /// `instance_col`; field columns follow in first-seen order, missing values null.
    pub fn widen(
        entries: &[LongEntry],
        parents: &DataFrame,
        id_cols: &[&str],
        instance_col: &str,
    ) -> Result<DataFrame> {
        let mut records: Vec<Record> = Vec::new();
        let mut row_of: HashMap<(usize, &str), usize> = HashMap::new();

        for entry in entries {
            let key = (entry.parent, entry.instance.as_str());
            let row = match row_of.get(&key) {
                Some(&row) => row,
                None => {
                    let mut record = Record::new();
                    for id_col in id_cols {
                        record.insert(id_col.to_string(), cell(parents, entry.parent, id_col));
                    }
                    record.insert(instance_col.to_string(), Value::String(entry.instance.clone()));
                    records.push(record);
                    row_of.insert(key, records.len() - 1);
                    records.len() - 1
                }
            };

            // a field sharing a name with an identifying column loses to it
            if id_cols.contains(&entry.field.as_str()) || entry.field == instance_col {
                continue;
            }
            records[row].insert(entry.field.clone(), entry.value.clone());
        }

        if records.is_empty() {
            let columns = id_cols
                .iter()
                .chain(std::iter::once(&instance_col))
                .map(|name| text_column(name, Vec::new()))
                .collect();
            return Ok(DataFrame::new(columns)?);
        }
        frame_from_records(&records)
    }

    /// Flatten nested objects into dotted keys (`{"a": {"b": 1}}` becomes `{"a.b": 1}`).
    pub fn flatten_object(map: &Map<String, Value>) -> Record {
        let mut out = Record::new();
        Self::flatten_into("", map, &mut out);
        out
    }

    fn flatten_into(prefix: &str, map: &Map<String, Value>, out: &mut Record) {
        for (key, value) in map {
            let name = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match value {
                Value::Object(inner) => Self::flatten_into(&name, inner, out),
                other => {
                    out.insert(name, other.clone());
                }
            }
        }
    }
}
