//! Extracted tables travel through the pipeline as polars `DataFrame`s.
//! The helpers here map frame columns onto warehouse types and instants.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use polars::prelude::{AnyValue, Column, DataFrame, DataType, IntoColumn, NamedFrom, Series, TimeUnit, TimeZone};
use crate::error::Result;
use crate::schema::{BqType, Field};

/// `NaiveDate::num_days_from_ce` of 1970-01-01, the day polars `Date` counts from.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Column type of every normalized instant: UTC at microsecond precision,
/// which is what BigQuery stores for TIMESTAMP.
pub fn instant_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, Some(TimeZone::UTC))
}

/// Warehouse column type for a frame column. Types without a closer match are staged as STRING.
pub fn bq_type_of(dtype: &DataType) -> BqType {
    match dtype {
        DataType::Boolean => BqType::Bool,
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => BqType::Int64,
        DataType::Float32 | DataType::Float64 => BqType::Float64,
        DataType::Decimal(..) => BqType::Numeric,
        DataType::Date => BqType::Date,
        DataType::Datetime(..) => BqType::Timestamp,
        _ => BqType::String,
    }
}

pub fn fields(df: &DataFrame) -> Vec<Field> {
    df.get_columns()
        .iter()
        .map(|c| Field::new(c.name().as_str(), bq_type_of(c.dtype())))
        .collect()
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

pub fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(EPOCH_DAYS_FROM_CE)?)
}

pub fn days_since_epoch(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

fn from_physical(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    let micros = match unit {
        TimeUnit::Nanoseconds => value.div_euclid(1_000),
        TimeUnit::Microseconds => value,
        TimeUnit::Milliseconds => value.checked_mul(1_000)?,
    };
    DateTime::from_timestamp_micros(micros)
}

/// Instant held by a `Datetime` or `Date` cell, truncated to microseconds.
/// Any other cell yields `None`.
pub fn instant_of(value: &AnyValue) -> Option<DateTime<Utc>> {
    match value {
        AnyValue::Datetime(v, unit, _) => from_physical(*v, *unit),
        AnyValue::Date(days) => date_from_days(*days)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc()),
        _ => None,
    }
}

pub fn instant_column(
    name: &str,
    values: impl IntoIterator<Item = Option<DateTime<Utc>>>,
) -> Result<Column> {
    let micros: Vec<Option<i64>> = values
        .into_iter()
        .map(|v| v.map(|ts| ts.timestamp_micros()))
        .collect();
    let series = Series::new(name.into(), micros).cast(&instant_dtype())?;
    Ok(series.into_column())
}

pub fn date_column(name: &str, values: impl IntoIterator<Item = Option<NaiveDate>>) -> Result<Column> {
    let days: Vec<Option<i32>> = values.into_iter().map(|v| v.map(days_since_epoch)).collect();
    let series = Series::new(name.into(), days).cast(&DataType::Date)?;
    Ok(series.into_column())
}

/// Every cell of column `name` read as an instant.
pub fn instants(df: &DataFrame, name: &str) -> Result<Vec<Option<DateTime<Utc>>>> {
    let column = df.column(name)?;
    (0..column.len())
        .map(|idx| Ok(instant_of(&column.get(idx)?)))
        .collect()
}
