use polars::prelude::DataFrame;
use std::fmt;
use tracing::{debug, info, warn};
use crate::config::{MergeStrategy, TableSpec};
use crate::error::{BigQueryError, IngestError, Result};
use crate::warehouse::sql::quote_ident;
use crate::warehouse::{DatasetLayout, TableRef, Warehouse};

/// Lifecycle of one table's staging and reconciliation within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    NotStaged,
    Staged,
    Reconciled(ReconcileAction),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Permanent table created as a copy of staging.
    Materialized,
    Replaced,
    Merged,
    /// Upsert refused by warehouse policy, table replaced instead.
    ReplacedAfterRejection,
}

impl ReconcileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileAction::Materialized => "materialized",
            ReconcileAction::Replaced => "replaced",
            ReconcileAction::Merged => "merged",
            ReconcileAction::ReplacedAfterRejection => "replaced_after_rejection",
        }
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one upsert attempt.
#[derive(Debug)]
pub enum UpsertOutcome {
    Merged,
    RejectedByPolicy(BigQueryError),
    Failed(IngestError),
}

pub fn materialize_sql(project: &str, permanent: &TableRef, staging: &TableRef) -> String {
    format!(
        "CREATE TABLE {} AS SELECT * FROM {}",
        permanent.sql_name(project),
        staging.sql_name(project)
    )
}

pub fn replace_sql(project: &str, permanent: &TableRef, staging: &TableRef) -> String {
    format!(
        "CREATE OR REPLACE TABLE {} AS SELECT * FROM {}",
        permanent.sql_name(project),
        staging.sql_name(project)
    )
}

/// Upsert keyed on `key`. `columns` is the permanent table's column list;
/// every non-key column is updated on match, all of them inserted otherwise.
pub fn merge_sql(
    project: &str,
    permanent: &TableRef,
    staging: &TableRef,
    key: &str,
    columns: &[String],
) -> Result<String> {
    if !columns.iter().any(|c| c == key) {
        return Err(IngestError::Reconcile(format!(
            "Primary key '{}' is not a column of {}",
            key, permanent
        )));
    }

    let key_ident = quote_ident(key);
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != key)
        .map(|c| {
            let ident = quote_ident(c);
            format!("T.{ident} = S.{ident}")
        })
        .collect();
    let insert_cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let insert_vals: Vec<String> = insert_cols.iter().map(|c| format!("S.{}", c)).collect();

    let mut sql = format!(
        "MERGE {target} T\nUSING {source} S\nON T.{key} = S.{key}\n",
        target = permanent.sql_name(project),
        source = staging.sql_name(project),
        key = key_ident,
    );
    if !updates.is_empty() {
        sql.push_str(&format!("WHEN MATCHED THEN UPDATE SET {}\n", updates.join(", ")));
    }
    sql.push_str(&format!(
        "WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        insert_cols.join(", "),
        insert_vals.join(", ")
    ));

    Ok(sql)
}

/// Moves one table's freshly extracted rows through staging into its
/// permanent table. Both tables are addressed by name only; their contents
/// are whatever the warehouse holds.
pub struct Reconciler<'a> {
    warehouse: &'a dyn Warehouse,
    spec: &'a TableSpec,
    permanent: TableRef,
    staging: TableRef,
    state: ReconcileState,
    column_cache: Option<Vec<String>>,
}

impl<'a> Reconciler<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, spec: &'a TableSpec, layout: &DatasetLayout) -> Self {
        Self {
            warehouse,
            spec,
            permanent: layout.permanent(&spec.name),
            staging: layout.staging(&spec.name),
            state: ReconcileState::NotStaged,
            column_cache: None,
        }
    }

    pub fn state(&self) -> ReconcileState {
        self.state
    }

    pub fn permanent(&self) -> &TableRef {
        &self.permanent
    }

    pub fn staging(&self) -> &TableRef {
        &self.staging
    }

    /// Overwrites the staging table with `data`.
    pub async fn stage(&mut self, data: &DataFrame) -> Result<()> {
        if self.state != ReconcileState::NotStaged {
            return Err(IngestError::Reconcile(format!(
                "{} cannot be staged from state {:?}",
                self.spec.name, self.state
            )));
        }

        match self.warehouse.load_overwrite(&self.staging, data).await {
            Ok(()) => {
                info!(table = %self.spec.name, staging = %self.staging, rows = data.height(), "Staged rows");
                self.state = ReconcileState::Staged;
                Ok(())
            }
            Err(e) => {
                self.state = ReconcileState::Failed;
                Err(e)
            }
        }
    }

    /// Brings the permanent table in line with staging.
    pub async fn reconcile(&mut self) -> Result<ReconcileAction> {
        self.require_staged()?;

        let result = self.reconcile_staged().await;
        self.state = match &result {
            Ok(action) => ReconcileState::Reconciled(*action),
            Err(_) => ReconcileState::Failed,
        };
        result
    }

    async fn reconcile_staged(&mut self) -> Result<ReconcileAction> {
        if !self.warehouse.table_exists(&self.permanent).await? {
            self.materialize().await?;
            return Ok(ReconcileAction::Materialized);
        }

        match self.spec.merge_strategy {
            MergeStrategy::Replace => {
                self.replace().await?;
                Ok(ReconcileAction::Replaced)
            }
            MergeStrategy::Merge => match self.upsert().await {
                UpsertOutcome::Merged => Ok(ReconcileAction::Merged),
                UpsertOutcome::RejectedByPolicy(reason) => {
                    warn!(
                        table = %self.spec.name,
                        code = reason.error_code(),
                        "MERGE blocked by warehouse policy, falling back to replace"
                    );
                    self.replace().await?;
                    Ok(ReconcileAction::ReplacedAfterRejection)
                }
                UpsertOutcome::Failed(e) => Err(e),
            },
        }
    }

    async fn materialize(&self) -> Result<()> {
        info!(table = %self.spec.name, target = %self.permanent, "Creating permanent table from staging");
        let sql = materialize_sql(self.warehouse.project_id(), &self.permanent, &self.staging);
        self.warehouse.execute(&sql).await
    }

    async fn replace(&self) -> Result<()> {
        info!(table = %self.spec.name, target = %self.permanent, "Replacing permanent table from staging");
        let sql = replace_sql(self.warehouse.project_id(), &self.permanent, &self.staging);
        self.warehouse.execute(&sql).await
    }

    /// Merges staging into the existing permanent table by primary key.
    pub async fn upsert(&mut self) -> UpsertOutcome {
        if let Err(e) = self.require_staged() {
            return UpsertOutcome::Failed(e);
        }

        let Some(key) = self.spec.primary_key.clone() else {
            return UpsertOutcome::Failed(IngestError::Config(format!(
                "Table '{}' uses merge but declares no primary_key",
                self.spec.name
            )));
        };

        let columns = match self.merge_columns().await {
            Ok(columns) => columns,
            Err(e) => return UpsertOutcome::Failed(e),
        };

        let sql = match merge_sql(self.warehouse.project_id(), &self.permanent, &self.staging, &key, &columns) {
            Ok(sql) => sql,
            Err(e) => return UpsertOutcome::Failed(e),
        };

        info!(table = %self.spec.name, key = %key, "Merging staging into permanent table");
        match self.warehouse.execute(&sql).await {
            Ok(()) => UpsertOutcome::Merged,
            Err(IngestError::BigQuery(bq)) if bq.is_policy_rejection() => UpsertOutcome::RejectedByPolicy(bq),
            Err(e) => UpsertOutcome::Failed(e),
        }
    }

    /// Permanent table columns, looked up once per reconciler.
    async fn merge_columns(&mut self) -> Result<Vec<String>> {
        if let Some(columns) = &self.column_cache {
            return Ok(columns.clone());
        }

        let columns = self.warehouse.table_columns(&self.permanent).await?;
        debug!(table = %self.spec.name, columns = columns.len(), "Fetched permanent table schema");
        self.column_cache = Some(columns.clone());
        Ok(columns)
    }

    fn require_staged(&self) -> Result<()> {
        if self.state == ReconcileState::Staged {
            Ok(())
        } else {
            Err(IngestError::Reconcile(format!(
                "{} is not staged (state {:?})",
                self.spec.name, self.state
            )))
        }
    }
}
