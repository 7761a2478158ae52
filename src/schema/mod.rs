
use serde::Serialize;
use tracing::debug;

use crate::record::{NormalizedValue, Record};

pub const TEXT_FIELD: &str = "textRepresentation";
pub const VECTOR_FIELD: &str = "contentVector";
pub const DEFAULT_KEY_FIELD: &str = "id";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 3072;

pub const VECTOR_PROFILE_NAME: &str = "vector-profile";
pub const VECTOR_ALGORITHM_NAME: &str = "hnsw-config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldType {
    #[serde(rename = "Edm.String")]
    String,
    #[serde(rename = "Edm.Int64")]
    Int64,
    #[serde(rename = "Edm.Double")]
    Double,
    #[serde(rename = "Edm.Boolean")]
    Boolean,
    #[serde(rename = "Edm.DateTimeOffset")]
    Timestamp,
    #[serde(rename = "Collection(Edm.Single)")]
    SingleVector,
}

impl FieldType {
    /// Map a normalized value to the index type used for its field.
    #[inline]
    pub fn for_value(value: &NormalizedValue) -> Self {
        match value {
            NormalizedValue::Int64(_) => FieldType::Int64,
            NormalizedValue::Double(_) => FieldType::Double,
            NormalizedValue::Timestamp(_) => FieldType::Timestamp,
            NormalizedValue::Boolean(_) => FieldType::Boolean,
            NormalizedValue::String(_) | NormalizedValue::Null => FieldType::String,
        }
    }
}

/// One field of the target index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub key: bool,
    pub searchable: bool,
    pub filterable: bool,
    pub sortable: bool,
    pub facetable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_search_profile: Option<String>,
}

impl FieldSchema {
    #[inline]
    pub fn key(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::String,
            key: true,
            searchable: false,
            filterable: true,
            sortable: false,
            facetable: false,
            dimensions: None,
            vector_search_profile: None,
        }
    }

    #[inline]
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::String,
            key: false,
            searchable: true,
            filterable: false,
            sortable: false,
            facetable: false,
            dimensions: None,
            vector_search_profile: None,
        }
    }

    #[inline]
    pub fn vector(name: &str, dimensions: u32) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::SingleVector,
            key: false,
            searchable: true,
            filterable: false,
            sortable: false,
            facetable: false,
            dimensions: Some(dimensions),
            vector_search_profile: Some(VECTOR_PROFILE_NAME.to_string()),
        }
    }

    /// A plain data field. Strings are searchable; every other type is
    /// filterable, sortable and facetable.
    #[inline]
    pub fn data(name: &str, field_type: FieldType) -> Self {
        let is_string = field_type == FieldType::String;
        Self {
            name: name.to_string(),
            field_type,
            key: false,
            searchable: is_string,
            filterable: !is_string,
            sortable: !is_string,
            facetable: !is_string,
            dimensions: None,
            vector_search_profile: None,
        }
    }
}

/// Names that never become data fields, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedNames {
    names: Vec<String>,
}

impl ReservedNames {
    /// `id` is only reserved when no key column was chosen.
    #[inline]
    pub fn for_key_column(key_column: Option<&str>) -> Self {
        let mut names = vec![TEXT_FIELD.to_string(), VECTOR_FIELD.to_string()];
        if key_column.is_none() {
            names.push(DEFAULT_KEY_FIELD.to_string());
        }
        Self { names }
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|reserved| reserved.eq_ignore_ascii_case(name))
    }

    /// Whether a record field is kept out of the data fields: a case variant
    /// of the key field or a reserved name.
    #[inline]
    pub fn excludes(&self, name: &str, key_field: &str) -> bool {
        name.eq_ignore_ascii_case(key_field) || self.contains(name)
    }
}

/// The key field name for a run: the chosen key column, or `id`.
#[inline]
pub fn key_field_name(key_column: Option<&str>) -> &str {
    key_column.unwrap_or(DEFAULT_KEY_FIELD)
}

/// Derive the index fields from the first record.
///
/// The key, text and vector entries always occupy positions 0, 1 and 2.
/// Later records are never consulted.
#[inline]
pub fn infer_schema(
    first_record: Option<&Record>,
    key_field: &str,
    reserved: &ReservedNames,
    dimensions: u32,
) -> Vec<FieldSchema> {
    let mut fields = vec![
        FieldSchema::key(key_field),
        FieldSchema::text(TEXT_FIELD),
        FieldSchema::vector(VECTOR_FIELD, dimensions),
    ];

    let Some(record) = first_record else {
        debug!("No first record, schema has only system fields");
        return fields;
    };

    for (name, value) in record.iter() {
        if reserved.excludes(name, key_field) {
            debug!("Skipping reserved field {}", name);
            continue;
        }
        fields.push(FieldSchema::data(name, FieldType::for_value(value)));
    }

    debug!("Inferred {} index fields", fields.len());
    fields
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HnswParameters {
    pub m: u32,
    pub ef_construction: u32,
    pub ef_search: u32,
    pub metric: String,
}

impl Default for HnswParameters {
    fn default() -> Self {
        Self {
            m: 4,
            ef_construction: 400,
            ef_search: 500,
            metric: "cosine".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorAlgorithm {
    pub name: String,
    pub kind: String,
    pub hnsw_parameters: HnswParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VectorProfile {
    pub name: String,
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorSearchConfig {
    pub algorithms: Vec<VectorAlgorithm>,
    pub profiles: Vec<VectorProfile>,
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        Self {
            algorithms: vec![VectorAlgorithm {
                name: VECTOR_ALGORITHM_NAME.to_string(),
                kind: "hnsw".to_string(),
                hnsw_parameters: HnswParameters::default(),
            }],
            profiles: vec![VectorProfile {
                name: VECTOR_PROFILE_NAME.to_string(),
                algorithm: VECTOR_ALGORITHM_NAME.to_string(),
            }],
        }
    }
}

/// Full index definition as sent to the search service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    pub vector_search: VectorSearchConfig,
}

impl IndexDefinition {
    #[inline]
    pub fn new(name: &str, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.to_string(),
            fields,
            vector_search: VectorSearchConfig::default(),
        }
    }

    #[inline]
    pub fn key_field(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.key)
    }

    #[inline]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }
}
