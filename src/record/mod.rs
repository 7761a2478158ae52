// Record model and value normalization
// Source rows carry provider-native values; everything downstream only sees NormalizedValue.


use std::fmt::{self, Write as _};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// A value as read from the data store, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    NaiveTimestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Decimal(String),
    Uuid(Uuid),
    Blob(Vec<u8>),
    Json(Value),
}

impl fmt::Display for SourceValue {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceValue::Null => write!(f, "null"),
            SourceValue::Bool(v) => write!(f, "{v}"),
            SourceValue::I8(v) => write!(f, "{v}"),
            SourceValue::I16(v) => write!(f, "{v}"),
            SourceValue::I32(v) => write!(f, "{v}"),
            SourceValue::I64(v) => write!(f, "{v}"),
            SourceValue::U8(v) => write!(f, "{v}"),
            SourceValue::U16(v) => write!(f, "{v}"),
            SourceValue::U32(v) => write!(f, "{v}"),
            SourceValue::U64(v) => write!(f, "{v}"),
            SourceValue::F32(v) => write!(f, "{v}"),
            SourceValue::F64(v) => write!(f, "{v}"),
            SourceValue::Text(v) | SourceValue::Decimal(v) => f.write_str(v),
            SourceValue::Timestamp(v) => f.write_str(&v.to_rfc3339()),
            SourceValue::NaiveTimestamp(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S%.f")),
            SourceValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            SourceValue::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
            SourceValue::Uuid(v) => write!(f, "{v}"),
            SourceValue::Blob(bytes) => {
                f.write_str("0x")?;
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            SourceValue::Json(v) => write!(f, "{v}"),
        }
    }
}

/// The closed set of value kinds a record may hold once normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    String(String),
    Int64(i64),
    Double(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Null,
}

impl NormalizedValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, NormalizedValue::Null)
    }

    /// JSON form used in index documents. Timestamps use RFC 3339 with offset.
    #[inline]
    pub fn to_json(&self) -> Value {
        match self {
            NormalizedValue::String(v) => Value::String(v.clone()),
            NormalizedValue::Int64(v) => Value::from(*v),
            NormalizedValue::Double(v) => Value::from(*v),
            NormalizedValue::Boolean(v) => Value::Bool(*v),
            NormalizedValue::Timestamp(v) => Value::String(v.to_rfc3339()),
            NormalizedValue::Null => Value::Null,
        }
    }
}

impl fmt::Display for NormalizedValue {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::String(v) => f.write_str(v),
            NormalizedValue::Int64(v) => write!(f, "{v}"),
            NormalizedValue::Double(v) => write!(f, "{v}"),
            NormalizedValue::Boolean(v) => write!(f, "{v}"),
            NormalizedValue::Timestamp(v) => f.write_str(&v.to_rfc3339()),
            NormalizedValue::Null => f.write_str("null"),
        }
    }
}

/// Normalize a single source value. Total: never fails.
#[inline]
pub fn normalize(value: SourceValue) -> NormalizedValue {
    match value {
        SourceValue::Null => NormalizedValue::Null,
        SourceValue::Bool(v) => NormalizedValue::Boolean(v),
        SourceValue::I8(v) => NormalizedValue::Int64(i64::from(v)),
        SourceValue::I16(v) => NormalizedValue::Int64(i64::from(v)),
        SourceValue::I32(v) => NormalizedValue::Int64(i64::from(v)),
        SourceValue::I64(v) => NormalizedValue::Int64(v),
        SourceValue::U8(v) => NormalizedValue::Int64(i64::from(v)),
        SourceValue::U16(v) => NormalizedValue::Int64(i64::from(v)),
        SourceValue::U32(v) => NormalizedValue::Int64(i64::from(v)),
        SourceValue::U64(v) => {
            i64::try_from(v).map_or_else(|_| NormalizedValue::String(v.to_string()), NormalizedValue::Int64)
        }
        SourceValue::F32(v) => NormalizedValue::Double(f64::from(v)),
        SourceValue::F64(v) => NormalizedValue::Double(v),
        SourceValue::Text(v) => NormalizedValue::String(v),
        SourceValue::Timestamp(v) => NormalizedValue::Timestamp(v),
        SourceValue::NaiveTimestamp(v) => NormalizedValue::Timestamp(v.and_utc()),
        other @ (SourceValue::Date(_)
        | SourceValue::Time(_)
        | SourceValue::Decimal(_)
        | SourceValue::Uuid(_)
        | SourceValue::Blob(_)
        | SourceValue::Json(_)) => NormalizedValue::String(other.to_string()),
    }
}

/// Coerce a key-column value to its string form. Null stays null.
#[inline]
pub fn normalize_key(value: SourceValue) -> NormalizedValue {
    match value {
        SourceValue::Null => NormalizedValue::Null,
        SourceValue::Text(v) => NormalizedValue::String(v),
        SourceValue::NaiveTimestamp(v) => NormalizedValue::String(v.and_utc().to_rfc3339()),
        other => NormalizedValue::String(other.to_string()),
    }
}

/// One row as fetched from the source, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    pub columns: Vec<(String, SourceValue)>,
}

impl SourceRow {
    #[inline]
    pub fn new(columns: Vec<(String, SourceValue)>) -> Self {
        Self { columns }
    }

    #[inline]
    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(column, _)| column == name)
    }
}

/// An ordered mapping from field name to normalized value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, NormalizedValue)>,
}

impl Record {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing an existing field with the exact same name in place.
    #[inline]
    pub fn insert(&mut self, name: impl Into<String>, value: NormalizedValue) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(field, _)| *field == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&NormalizedValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NormalizedValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as `name: value` lines in field order.
    #[inline]
    pub fn to_prompt_lines(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.fields {
            let _ = writeln!(out, "{name}: {value}");
        }
        out
    }
}

impl FromIterator<(String, NormalizedValue)> for Record {
    #[inline]
    fn from_iter<I: IntoIterator<Item = (String, NormalizedValue)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

/// Normalize a whole row. The key column, when designated, is stringified
/// before the generic pass so it always compares as a string.
#[inline]
pub fn normalize_row(row: SourceRow, key_column: Option<&str>) -> Record {
    row.columns
        .into_iter()
        .map(|(name, value)| {
            let normalized = if key_column == Some(name.as_str()) {
                normalize_key(value)
            } else {
                normalize(value)
            };
            (name, normalized)
        })
        .collect()
}
