
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::record::{NormalizedValue, Record};
use crate::schema::{IndexDefinition, TEXT_FIELD, VECTOR_FIELD};

/// A record enriched with key, summary and embedding, ready for upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    #[inline]
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Drop every field the index does not declare, returning the dropped names.
    #[inline]
    pub fn retain_schema_fields(&mut self, definition: &IndexDefinition) -> Vec<String> {
        let dropped: Vec<String> = self
            .fields
            .keys()
            .filter(|name| !definition.has_field(name))
            .cloned()
            .collect();
        for name in &dropped {
            self.fields.shift_remove(name);
        }
        dropped
    }
}

/// Build a document. Record fields are copied first so the key, summary and
/// vector always win over same-named source fields.
#[inline]
pub fn assemble(
    record: &Record,
    key: &str,
    key_field: &str,
    summary: &str,
    vector: Vec<f32>,
) -> Document {
    let mut fields = Map::new();
    for (name, value) in record.iter() {
        fields.insert(name.to_string(), value.to_json());
    }

    fields.insert(key_field.to_string(), Value::String(key.to_string()));
    fields.insert(TEXT_FIELD.to_string(), Value::String(summary.to_string()));
    fields.insert(
        VECTOR_FIELD.to_string(),
        Value::Array(vector.into_iter().map(|v| Value::from(f64::from(v))).collect()),
    );

    Document { fields }
}

/// The document key for a record: the stringified key column when present
/// and non-empty, otherwise a freshly generated UUID.
#[inline]
pub fn resolve_key(record: &Record, key_column: Option<&str>) -> String {
    let Some(column) = key_column else {
        return Uuid::new_v4().to_string();
    };

    match record.get(column) {
        Some(NormalizedValue::Null) | None => {
            warn!("Key column '{}' is empty for a record, generating a key", column);
            Uuid::new_v4().to_string()
        }
        Some(value) => {
            let key = value.to_string();
            if key.is_empty() {
                warn!("Key column '{}' is empty for a record, generating a key", column);
                Uuid::new_v4().to_string()
            } else {
                key
            }
        }
    }
}
