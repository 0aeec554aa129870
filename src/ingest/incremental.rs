use chrono::{DateTime, Utc};
use polars::prelude::{col, lit, DataFrame, IntoLazy};
use tracing::{debug, info};
use crate::config::TableSpec;
use crate::dataset::{has_column, instant_dtype};
use crate::error::{IngestError, Result};
use crate::transform::{canonical, coerce_column, parse_instant};
use crate::warehouse::sql::quote_ident;
use crate::warehouse::{TableRef, Warehouse};

/// What the incremental filter did to one table's dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// Table is not incremental, or declares no timestamp column.
    NotApplicable,
    /// Permanent table does not exist yet; everything is loaded.
    FirstLoad,
    /// The timestamp column is not in the extracted dataset.
    ColumnMissing,
    /// Permanent table exists but has no watermark (no rows).
    NoWatermark,
    Filtered {
        watermark: DateTime<Utc>,
        kept: usize,
        dropped: usize,
    },
}

impl FilterOutcome {
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        match self {
            FilterOutcome::Filtered { watermark, .. } => Some(*watermark),
            _ => None,
        }
    }
}

pub fn watermark_sql(project: &str, permanent: &TableRef, column: &str) -> String {
    format!(
        "SELECT CAST(MAX({col}) AS STRING) FROM {table}",
        col = quote_ident(column),
        table = permanent.sql_name(project),
    )
}

/// Maximum value of `column` currently in the permanent table, read fresh.
pub async fn current_watermark(
    warehouse: &dyn Warehouse,
    permanent: &TableRef,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    let sql = watermark_sql(warehouse.project_id(), permanent, column);

    match warehouse.query_scalar(&sql).await? {
        None => Ok(None),
        Some(raw) => parse_instant(&raw).map(Some).ok_or_else(|| {
            IngestError::Watermark(format!(
                "Cannot parse watermark '{}' of {}.{}",
                raw, permanent, column
            ))
        }),
    }
}

/// Keeps only rows whose `column` is strictly after `watermark`.
/// The column is coerced to instants first, so unparsable values drop out.
pub fn retain_newer(df: &mut DataFrame, column: &str, watermark: DateTime<Utc>) -> Result<usize> {
    let Ok(current) = df.column(column) else {
        return Ok(0);
    };

    let (coerced, _) = coerce_column(current)?;
    df.with_column(coerced)?;

    let before = df.height();
    let cutoff = lit(canonical(watermark).timestamp_micros()).cast(instant_dtype());
    *df = df.clone().lazy().filter(col(column).gt(cutoff)).collect()?;

    Ok(before - df.height())
}

/// Restricts `df` to rows newer than the permanent table's watermark.
pub async fn apply_incremental_filter(
    warehouse: &dyn Warehouse,
    spec: &TableSpec,
    permanent: &TableRef,
    df: &mut DataFrame,
) -> Result<FilterOutcome> {
    let Some(column) = spec.incremental_column() else {
        return Ok(FilterOutcome::NotApplicable);
    };

    if !warehouse.table_exists(permanent).await? {
        info!(table = %spec.name, "Permanent table absent, loading all rows");
        return Ok(FilterOutcome::FirstLoad);
    }

    if !has_column(df, column) {
        debug!(table = %spec.name, column, "Timestamp column not extracted, skipping filter");
        return Ok(FilterOutcome::ColumnMissing);
    }

    let Some(watermark) = current_watermark(warehouse, permanent, column).await? else {
        info!(table = %spec.name, "Permanent table is empty, loading all rows");
        return Ok(FilterOutcome::NoWatermark);
    };

    let dropped = retain_newer(df, column, watermark)?;
    let kept = df.height();
    info!(table = %spec.name, %watermark, kept, dropped, "Applied incremental filter");

    Ok(FilterOutcome::Filtered { watermark, kept, dropped })
}
