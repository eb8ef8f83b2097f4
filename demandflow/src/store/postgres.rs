//! Postgres-backed [`RelationalSource`].

use super::RelationalSource;
use crate::config::SourceConfig;
use crate::errors::DemandflowError;
use crate::table::Table;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::{BigDecimal, Uuid};
use sqlx::{Column, Executor, Row, Statement, TypeInfo};
use tracing::debug;

/// Reads tables from Postgres.
///
/// The pool connects lazily, so an unreachable database surfaces as
/// `SourceUnavailable` on the first fetch rather than at construction.
#[derive(Debug, Clone)]
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    /// Creates a lazily connected source.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the database URL cannot be parsed.
    pub fn connect_lazy(config: &SourceConfig) -> Result<Self, DemandflowError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.timeout())
            .connect_lazy(&config.database_url)
            .map_err(|e| DemandflowError::Config(format!("invalid database url: {e}")))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RelationalSource for PgSource {
    async fn fetch(&self, query: &str) -> Result<Table, DemandflowError> {
        let statement = (&self.pool).prepare(query).await.map_err(map_sqlx_error)?;
        let columns = statement.columns();
        let mut table = Table::new(columns.iter().map(|c| c.name().to_string()));
        let cell_types = columns
            .iter()
            .enumerate()
            .map(|(index, c)| CellType::for_column(index, c.type_info().name()))
            .collect::<Result<Vec<_>, _>>()?;

        let rows = statement
            .query()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!(rows = rows.len(), "Fetched rows from Postgres");

        for row in &rows {
            let cells = cell_types
                .iter()
                .enumerate()
                .map(|(index, cell_type)| render_cell(row, index, *cell_type))
                .collect::<Result<Vec<_>, _>>()?;
            table.push_row(cells)?;
        }
        Ok(table)
    }
}

/// How a Postgres column is decoded before it is rendered as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellType {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Bool,
    Text,
    Uuid,
    Json,
    Date,
    Time,
    Timestamp,
    TimestampTz,
}

impl CellType {
    fn from_type_name(type_name: &str) -> Option<Self> {
        let cell_type = match type_name {
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "INT8" => Self::Int8,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "NUMERIC" => Self::Numeric,
            "BOOL" => Self::Bool,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => Self::Text,
            "UUID" => Self::Uuid,
            "JSON" | "JSONB" => Self::Json,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "TIMESTAMP" => Self::Timestamp,
            "TIMESTAMPTZ" => Self::TimestampTz,
            _ => return None,
        };
        Some(cell_type)
    }

    // Checked once per statement, before any row is fetched.
    fn for_column(index: usize, type_name: &str) -> Result<Self, DemandflowError> {
        Self::from_type_name(type_name).ok_or_else(|| {
            DemandflowError::QueryError(format!(
                "unsupported column type {type_name} at position {index}; cast it to text in the query"
            ))
        })
    }
}

fn render_cell(row: &PgRow, index: usize, cell_type: CellType) -> Result<String, DemandflowError> {
    fn get<'r, T>(row: &'r PgRow, index: usize) -> Result<Option<T>, DemandflowError>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        row.try_get::<Option<T>, _>(index).map_err(map_sqlx_error)
    }

    let cell = match cell_type {
        CellType::Int2 => get::<i16>(row, index)?.map(|v| v.to_string()),
        CellType::Int4 => get::<i32>(row, index)?.map(|v| v.to_string()),
        CellType::Int8 => get::<i64>(row, index)?.map(|v| v.to_string()),
        CellType::Float4 => get::<f32>(row, index)?.map(|v| v.to_string()),
        CellType::Float8 => get::<f64>(row, index)?.map(|v| v.to_string()),
        CellType::Numeric => get::<BigDecimal>(row, index)?.map(|v| v.to_string()),
        CellType::Bool => get::<bool>(row, index)?.map(|v| v.to_string()),
        CellType::Text => get::<String>(row, index)?,
        CellType::Uuid => get::<Uuid>(row, index)?.map(|v| v.to_string()),
        CellType::Json => get::<JsonValue>(row, index)?.map(|v| v.to_string()),
        CellType::Date => get::<NaiveDate>(row, index)?.map(|v| v.format("%Y-%m-%d").to_string()),
        CellType::Time => get::<NaiveTime>(row, index)?.map(|v| v.format("%H:%M:%S").to_string()),
        CellType::Timestamp => {
            get::<NaiveDateTime>(row, index)?.map(|v| v.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        CellType::TimestampTz => get::<DateTime<Utc>>(row, index)?.map(|v| v.to_rfc3339()),
    };
    Ok(cell.unwrap_or_default())
}

// SQLSTATE classes that mean the server or the session is the problem, not the query:
// 08 connection exception, 28 invalid authorization, 3D invalid catalog name,
// 53 insufficient resources, 57P operator intervention.
const UNAVAILABLE_SQLSTATE_PREFIXES: [&str; 5] = ["08", "28", "3D", "53", "57P"];

fn map_sqlx_error(err: sqlx::Error) -> DemandflowError {
    match err {
        sqlx::Error::Database(db) => {
            let unavailable = db.code().is_some_and(|code| {
                UNAVAILABLE_SQLSTATE_PREFIXES
                    .into_iter()
                    .any(|prefix| code.starts_with(prefix))
            });
            if unavailable {
                DemandflowError::SourceUnavailable(db.to_string())
            } else {
                DemandflowError::QueryError(db.to_string())
            }
        }
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => DemandflowError::QueryError(err.to_string()),
        other => DemandflowError::SourceUnavailable(other.to_string()),
    }
}
