mod client;
pub mod sql;

use async_trait::async_trait;
use polars::prelude::DataFrame;
use serde_json::Value as JsonValue;
use std::fmt;
use tracing::debug;
use crate::error::Result;

pub use client::BqClient;

/// A named table inside one warehouse dataset. The table's state lives in the
/// warehouse; this is only an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    pub fn fqn(&self, project: &str) -> String {
        format!("{}.{}.{}", project, self.dataset, self.table)
    }

    /// Backtick-quoted fully qualified name for use in SQL.
    pub fn sql_name(&self, project: &str) -> String {
        format!("`{}`", self.fqn(project).replace('`', ""))
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Where permanent, staging and metrics tables live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub raw: String,
    pub staging: String,
    pub meta: String,
}

impl DatasetLayout {
    pub fn new(raw: impl Into<String>, staging: impl Into<String>, meta: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            staging: staging.into(),
            meta: meta.into(),
        }
    }

    pub fn permanent(&self, table: &str) -> TableRef {
        TableRef::new(&self.raw, table)
    }

    pub fn staging(&self, table: &str) -> TableRef {
        TableRef::new(&self.staging, table)
    }

    pub fn meta_table(&self, table: &str) -> TableRef {
        TableRef::new(&self.meta, table)
    }

    pub fn datasets(&self) -> [&str; 3] {
        [&self.raw, &self.staging, &self.meta]
    }
}

/// Capabilities the pipeline needs from the analytical warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    fn project_id(&self) -> &str;

    /// Creates the dataset when it does not exist yet.
    async fn ensure_dataset(&self, dataset: &str) -> Result<()>;

    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    /// Replaces the table's contents (and schema) with `data`.
    async fn load_overwrite(&self, table: &TableRef, data: &DataFrame) -> Result<()>;

    /// Runs a statement and waits for it to finish.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Column names of the table's current schema, in order.
    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>>;

    /// First column of the first row, as text. `None` for no rows or SQL NULL.
    async fn query_scalar(&self, sql: &str) -> Result<Option<String>>;

    /// Streams rows into an existing table.
    async fn insert_rows(&self, table: &TableRef, rows: &[JsonValue]) -> Result<()>;
}

/// Creates the raw, staging and meta datasets. Safe to call on every run.
pub async fn ensure_datasets(warehouse: &dyn Warehouse, layout: &DatasetLayout) -> Result<()> {
    for dataset in layout.datasets() {
        warehouse.ensure_dataset(dataset).await?;
    }
    Ok(())
}

/// Overwrites `table` with `data` through inline-literal DDL run on `warehouse`.
/// Returns the number of statements executed.
pub async fn load_inline(
    warehouse: &dyn Warehouse,
    table: &TableRef,
    data: &DataFrame,
    max_statement_bytes: usize,
) -> Result<usize> {
    let statements = sql::staging_statements_with_limit(warehouse.project_id(), table, data, max_statement_bytes)?;
    debug!(table = %table, rows = data.height(), statements = statements.len(), "Loading table");
    for statement in &statements {
        warehouse.execute(statement).await?;
    }
    Ok(statements.len())
}
