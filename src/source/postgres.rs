use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use polars::prelude::{Column, DataFrame, DataType, IntoColumn, NamedFrom, Series};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::{BigDecimal, Uuid};
use sqlx::{Column as _, Decode, Postgres, Row, Type, TypeInfo};
use std::time::Duration;
use tracing::{debug, info};
use crate::config::PostgresConfig;
use crate::dataset::{date_column, instant_column};
use crate::error::{IngestError, Result};
use crate::schema::BqType;
use super::Source;

/// Widest decimal a frame column holds.
const NUMERIC_PRECISION: usize = 38;

pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let options = config.connect_options()?;
        info!(target_db = %config.display_target(), "Connecting to source database");

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }
}

/// Warehouse column type for a Postgres type name.
pub fn bq_type_for(pg_type: &str) -> Option<BqType> {
    let t = match pg_type {
        "BOOL" => BqType::Bool,
        "INT2" | "INT4" | "INT8" => BqType::Int64,
        "FLOAT4" | "FLOAT8" => BqType::Float64,
        "NUMERIC" => BqType::Numeric,
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" | "UUID" | "TIME" | "JSON" | "JSONB" => {
            BqType::String
        }
        "DATE" => BqType::Date,
        "TIMESTAMP" | "TIMESTAMPTZ" => BqType::Timestamp,
        _ => return None,
    };
    Some(t)
}

fn cells<'r, T>(rows: &'r [PgRow], index: usize) -> std::result::Result<Vec<Option<T>>, sqlx::Error>
where
    Option<T>: Decode<'r, Postgres> + Type<Postgres>,
{
    rows.iter().map(|row| row.try_get::<Option<T>, _>(index)).collect()
}

fn text_cells<'r, T, F>(rows: &'r [PgRow], index: usize, render: F) -> std::result::Result<Vec<Option<String>>, sqlx::Error>
where
    Option<T>: Decode<'r, Postgres> + Type<Postgres>,
    F: Fn(T) -> String,
{
    Ok(cells::<T>(rows, index)?
        .into_iter()
        .map(|v| v.map(&render))
        .collect())
}

/// Digits after the decimal point, enough for every value in the column.
fn decimal_scale(values: &[Option<String>]) -> usize {
    values
        .iter()
        .flatten()
        .map(|v| v.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0))
        .max()
        .unwrap_or(0)
        .min(NUMERIC_PRECISION)
}

/// Decodes column `index` of every row into one frame column.
fn decode_column(rows: &[PgRow], index: usize, name: &str, pg_type: &str) -> Result<Column> {
    let column = match pg_type {
        "BOOL" => Series::new(name.into(), cells::<bool>(rows, index)?).into_column(),
        "INT2" => Series::new(name.into(), cells::<i16>(rows, index)?.into_iter().map(|v| v.map(i64::from)).collect::<Vec<_>>()).into_column(),
        "INT4" => Series::new(name.into(), cells::<i32>(rows, index)?.into_iter().map(|v| v.map(i64::from)).collect::<Vec<_>>()).into_column(),
        "INT8" => Series::new(name.into(), cells::<i64>(rows, index)?).into_column(),
        "FLOAT4" => Series::new(name.into(), cells::<f32>(rows, index)?.into_iter().map(|v| v.map(f64::from)).collect::<Vec<_>>()).into_column(),
        "FLOAT8" => Series::new(name.into(), cells::<f64>(rows, index)?).into_column(),
        "NUMERIC" => {
            let text = text_cells::<BigDecimal, _>(rows, index, |d| d.to_plain_string())?;
            let scale = decimal_scale(&text);
            Series::new(name.into(), text)
                .cast(&DataType::Decimal(Some(NUMERIC_PRECISION), Some(scale)))?
                .into_column()
        }
        "DATE" => date_column(name, cells::<NaiveDate>(rows, index)?)?,
        "TIMESTAMP" => instant_column(
            name,
            cells::<NaiveDateTime>(rows, index)?.into_iter().map(|v| v.map(|ts| ts.and_utc())),
        )?,
        "TIMESTAMPTZ" => instant_column(name, cells::<DateTime<Utc>>(rows, index)?)?,
        "UUID" => Series::new(name.into(), text_cells::<Uuid, _>(rows, index, |u| u.to_string())?).into_column(),
        "TIME" => Series::new(
            name.into(),
            text_cells::<NaiveTime, _>(rows, index, |t| t.format("%H:%M:%S%.f").to_string())?,
        )
        .into_column(),
        "JSON" | "JSONB" => Series::new(name.into(), text_cells::<JsonValue, _>(rows, index, |v| v.to_string())?).into_column(),
        _ => Series::new(name.into(), cells::<String>(rows, index)?).into_column(),
    };
    Ok(column)
}

fn rows_to_frame(rows: &[PgRow]) -> Result<DataFrame> {
    let Some(first) = rows.first() else {
        return Ok(DataFrame::empty());
    };

    let mut columns = Vec::with_capacity(first.columns().len());
    for (index, col) in first.columns().iter().enumerate() {
        let pg_type = col.type_info().name().to_uppercase();
        if bq_type_for(&pg_type).is_none() {
            return Err(IngestError::UnsupportedColumn {
                column: col.name().to_string(),
                type_name: pg_type,
            });
        }
        columns.push(decode_column(rows, index, col.name(), &pg_type)?);
    }

    Ok(DataFrame::new(columns)?)
}

#[async_trait]
impl Source for PgSource {
    async fn extract(&self, table: &str) -> Result<DataFrame> {
        let sql = format!("SELECT * FROM {}", source_table_name(table));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        debug!(table, rows = rows.len(), "Fetched source rows");
        rows_to_frame(&rows)
    }
}

fn is_plain_ident(part: &str) -> bool {
    let mut chars = part.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Table name as written into the source query. Plain identifiers stay
/// unquoted so Postgres folds them to lower case (`Users` reads `users`);
/// any other dot-separated part is double-quoted verbatim.
fn source_table_name(name: &str) -> String {
    name.split('.')
        .map(|part| {
            if is_plain_ident(part) {
                part.to_string()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mapping() {
        assert_eq!(bq_type_for("INT4"), Some(BqType::Int64));
        assert_eq!(bq_type_for("TIMESTAMPTZ"), Some(BqType::Timestamp));
        assert_eq!(bq_type_for("NUMERIC"), Some(BqType::Numeric));
        assert_eq!(bq_type_for("UUID"), Some(BqType::String));
        assert_eq!(bq_type_for("JSONB"), Some(BqType::String));
        assert_eq!(bq_type_for("TSVECTOR"), None);
    }

    #[test]
    fn test_plain_names_fold_like_postgres() {
        assert_eq!(source_table_name("users"), "users");
        assert_eq!(source_table_name("Users"), "Users");
        assert_eq!(source_table_name("public.card_transactions"), "public.card_transactions");
    }

    #[test]
    fn test_other_names_are_quoted() {
        assert_eq!(source_table_name("card-transactions"), "\"card-transactions\"");
        assert_eq!(source_table_name("public.we\"ird"), "public.\"we\"\"ird\"");
        assert_eq!(source_table_name("2024_loans"), "\"2024_loans\"");
    }

    #[test]
    fn test_decimal_scale_covers_widest_fraction() {
        let values = vec![Some("10.5".to_string()), None, Some("3".to_string()), Some("0.125".to_string())];
        assert_eq!(decimal_scale(&values), 3);
        assert_eq!(decimal_scale(&[None]), 0);
    }

    #[test]
    fn test_no_rows_is_empty_frame() {
        let df = rows_to_frame(&[]).unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 0);
    }
}
