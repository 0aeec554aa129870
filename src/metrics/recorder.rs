use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info};
use crate::error::{IngestError, Result};
use crate::transform::canonical;
use crate::warehouse::sql::{quote_ident, string_literal};
use crate::warehouse::{DatasetLayout, TableRef, Warehouse};

pub const METRICS_TABLE: &str = "ingestion_metrics";

/// One table's outcome for one run. Appended to the metrics table, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub table: String,
    pub rows_extracted: i64,
    pub extraction_time_sec: f64,
    pub load_time_sec: f64,
    pub timestamp: DateTime<Utc>,
}

impl RunMetrics {
    pub fn to_row(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Builds the metrics record for a finished table and logs it.
pub fn emit_metrics(table: &str, rows_extracted: usize, extraction: Duration, load: Duration) -> RunMetrics {
    let metrics = RunMetrics {
        table: table.to_string(),
        rows_extracted: i64::try_from(rows_extracted).unwrap_or(i64::MAX),
        extraction_time_sec: extraction.as_secs_f64(),
        load_time_sec: load.as_secs_f64(),
        timestamp: canonical(Utc::now()),
    };

    info!(
        table,
        rows_extracted = metrics.rows_extracted,
        extraction_time_sec = metrics.extraction_time_sec,
        load_time_sec = metrics.load_time_sec,
        timestamp = %metrics.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        "Run metrics"
    );

    metrics
}

/// Append-only store of [`RunMetrics`] in the meta dataset.
pub struct MetricsStore<'a> {
    warehouse: &'a dyn Warehouse,
    table: TableRef,
}

impl<'a> MetricsStore<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, layout: &DatasetLayout) -> Self {
        Self {
            warehouse,
            table: layout.meta_table(METRICS_TABLE),
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table_name} (
                `table` STRING NOT NULL,
                rows_extracted INT64,
                extraction_time_sec FLOAT64,
                load_time_sec FLOAT64,
                timestamp TIMESTAMP
            )
            "#,
            table_name = self.table.sql_name(self.warehouse.project_id())
        );

        self.warehouse.execute(&sql).await
    }

    /// Creates the metrics table if needed and appends one record.
    pub async fn write_metrics(&self, metrics: &RunMetrics) -> Result<()> {
        self.ensure_table().await?;
        let row = metrics.to_row()?;
        self.warehouse.insert_rows(&self.table, &[row]).await?;
        debug!(table = %metrics.table, store = %self.table, "Wrote run metrics");
        Ok(())
    }

    pub fn last_rowcount_sql(&self, table: &str, before: DateTime<Utc>) -> String {
        format!(
            "SELECT CAST(rows_extracted AS STRING) FROM {metrics} \
             WHERE {table_col} = {table} AND timestamp < TIMESTAMP '{before}' \
             ORDER BY timestamp DESC LIMIT 1",
            metrics = self.table.sql_name(self.warehouse.project_id()),
            table_col = quote_ident("table"),
            table = string_literal(table),
            before = before.to_rfc3339_opts(SecondsFormat::Micros, true),
        )
    }

    /// Row count of the latest record for `table` written before `before`.
    pub async fn last_rowcount(&self, table: &str, before: DateTime<Utc>) -> Result<Option<i64>> {
        let sql = self.last_rowcount_sql(table, before);
        match self.warehouse.query_scalar(&sql).await? {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| IngestError::Client(format!("Unexpected rows_extracted value '{}'", raw))),
        }
    }
}
