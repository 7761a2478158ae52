// Record source module
// Reads a bounded batch of rows with provider-native values


use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row, Sqlite, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::IndexerError;
use crate::record::{SourceRow, SourceValue};

#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch at most `limit` rows of `table`, in source order.
    async fn fetch(&self, table: &str, limit: u32) -> crate::Result<Vec<SourceRow>>;
}

/// Quote an identifier for use in SQL text.
#[inline]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone)]
pub struct SqliteSource {
    pool: Pool<Sqlite>,
}

impl SqliteSource {
    /// Open a read-only pool for a sqlx SQLite URL.
    #[inline]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to source database")?;

        info!("Connected to source database");
        Ok(Self { pool })
    }

    #[inline]
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    #[inline]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl RecordSource for SqliteSource {
    async fn fetch(&self, table: &str, limit: u32) -> crate::Result<Vec<SourceRow>> {
        let sql = format!("SELECT * FROM {} LIMIT ?", quote_identifier(table));
        debug!("Fetching rows: {}", sql);

        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IndexerError::SourceFetch(format!("query on table '{table}' failed: {e}")))?;

        let records = rows.iter().map(decode_row).collect::<Vec<_>>();
        info!("Retrieved {} rows from {}", records.len(), table);
        Ok(records)
    }
}

/// Decode every column of a row. Declared column types drive the richer
/// kinds (booleans, dates, timestamps); storage classes cover the rest.
#[inline]
pub fn decode_row(row: &SqliteRow) -> SourceRow {
    let columns = row
        .columns()
        .iter()
        .map(|column| {
            let declared = column.type_info().name().to_ascii_uppercase();
            (column.name().to_string(), decode_value(row, column.ordinal(), &declared))
        })
        .collect();
    SourceRow::new(columns)
}

fn decode_value(row: &SqliteRow, index: usize, declared: &str) -> SourceValue {
    let Ok(raw) = row.try_get_raw(index) else {
        return SourceValue::Null;
    };
    if raw.is_null() {
        return SourceValue::Null;
    }
    let storage = raw.type_info().name().to_ascii_uppercase();

    let declared_kind = match declared {
        "BOOLEAN" | "BOOL" => row.try_get::<bool, _>(index).ok().map(SourceValue::Bool),
        "DATETIME" | "TIMESTAMP" => decode_timestamp(row, index),
        "DATE" => row.try_get::<NaiveDate, _>(index).ok().map(SourceValue::Date),
        "TIME" => row.try_get::<NaiveTime, _>(index).ok().map(SourceValue::Time),
        "NUMERIC" | "DECIMAL" if storage == "TEXT" => {
            row.try_get::<String, _>(index).ok().map(SourceValue::Decimal)
        }
        _ => None,
    };
    if let Some(value) = declared_kind {
        return value;
    }

    let by_storage = match storage.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index).ok().map(SourceValue::I64),
        "REAL" => row.try_get::<f64, _>(index).ok().map(SourceValue::F64),
        "TEXT" => row.try_get::<String, _>(index).ok().map(SourceValue::Text),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).ok().map(SourceValue::Blob),
        _ => None,
    };

    by_storage
        .or_else(|| row.try_get_unchecked::<String, _>(index).ok().map(SourceValue::Text))
        .unwrap_or(SourceValue::Null)
}

fn decode_timestamp(row: &SqliteRow, index: usize) -> Option<SourceValue> {
    row.try_get::<DateTime<Utc>, _>(index)
        .ok()
        .map(SourceValue::Timestamp)
        .or_else(|| {
            row.try_get::<NaiveDateTime, _>(index)
                .ok()
                .map(SourceValue::NaiveTimestamp)
        })
}
