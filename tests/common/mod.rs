#![allow(dead_code)]

use async_trait::async_trait;
use bqingest::error::{BigQueryError, IngestError, Result};
use bqingest::warehouse::{TableRef, Warehouse};
use bqingest::Source;
use polars::prelude::DataFrame;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::Dispatch;

pub const PROJECT: &str = "test-project";

#[derive(Default)]
struct WarehouseState {
    datasets: BTreeSet<String>,
    /// `dataset.table` to column names
    tables: HashMap<String, Vec<String>>,
    executed: Vec<String>,
    staged: HashMap<String, DataFrame>,
    inserted: Vec<(TableRef, JsonValue)>,
    scalars: Vec<(String, Option<String>)>,
    scalar_queries: Vec<String>,
    reject_dml: bool,
    deny_merge: bool,
    fail_merge: bool,
    reject_inserts: bool,
    fail_scalars: bool,
}

/// In-memory warehouse that records every statement it receives.
#[derive(Clone, Default)]
pub struct FakeWarehouse {
    state: Arc<Mutex<WarehouseState>>,
}

fn billing_rejection() -> IngestError {
    IngestError::BigQuery(BigQueryError::BillingNotEnabled {
        message: "Billing has not been enabled for this project. DML queries are not allowed in the free tier.".to_string(),
    })
}

/// Table names between the backticks of a statement, as `dataset.table`.
fn backticked_tables(sql: &str) -> Vec<String> {
    sql.split('`')
        .skip(1)
        .step_by(2)
        .filter(|name| name.starts_with(PROJECT))
        .map(|name| name.trim_start_matches(PROJECT).trim_start_matches('.').to_string())
        .collect()
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, WarehouseState> {
        self.state.lock().unwrap()
    }

    pub fn with_table(self, table: &TableRef, columns: &[&str]) -> Self {
        self.state().tables.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Answers `query_scalar` with `value` whenever the SQL contains `pattern`.
    pub fn with_scalar(self, pattern: &str, value: Option<&str>) -> Self {
        self.state()
            .scalars
            .push((pattern.to_string(), value.map(str::to_string)));
        self
    }

    /// Refuses MERGE, INSERT, UPDATE and DELETE the way the free tier does.
    pub fn rejecting_dml(self) -> Self {
        self.state().reject_dml = true;
        self
    }

    /// Fails MERGE with a plain missing-permission error.
    pub fn denying_merge(self) -> Self {
        self.state().deny_merge = true;
        self
    }

    pub fn failing_merge(self) -> Self {
        self.state().fail_merge = true;
        self
    }

    pub fn rejecting_inserts(self) -> Self {
        self.state().reject_inserts = true;
        self
    }

    pub fn failing_scalars(self) -> Self {
        self.state().fail_scalars = true;
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    pub fn executed_matching(&self, prefix: &str) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|sql| sql.trim_start().starts_with(prefix))
            .collect()
    }

    pub fn scalar_queries(&self) -> Vec<String> {
        self.state().scalar_queries.clone()
    }

    pub fn staged(&self, table: &TableRef) -> Option<DataFrame> {
        self.state().staged.get(&table.to_string()).cloned()
    }

    pub fn inserted(&self) -> Vec<(TableRef, JsonValue)> {
        self.state().inserted.clone()
    }

    pub fn datasets(&self) -> Vec<String> {
        self.state().datasets.iter().cloned().collect()
    }

    pub fn has_table(&self, table: &TableRef) -> bool {
        self.state().tables.contains_key(&table.to_string())
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    fn project_id(&self) -> &str {
        PROJECT
    }

    async fn ensure_dataset(&self, dataset: &str) -> Result<()> {
        self.state().datasets.insert(dataset.to_string());
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        Ok(self.has_table(table))
    }

    async fn load_overwrite(&self, table: &TableRef, data: &DataFrame) -> Result<()> {
        let mut state = self.state();
        let columns = data.get_columns().iter().map(|c| c.name().to_string()).collect();
        state.tables.insert(table.to_string(), columns);
        state.staged.insert(table.to_string(), data.clone());
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let mut state = self.state();
        state.executed.push(sql.to_string());

        let statement = sql.trim_start();
        let is_dml = ["MERGE", "INSERT", "UPDATE", "DELETE"]
            .iter()
            .any(|keyword| statement.starts_with(keyword));
        if is_dml && state.reject_dml {
            return Err(billing_rejection());
        }
        if statement.starts_with("MERGE") {
            if state.deny_merge {
                return Err(IngestError::BigQuery(BigQueryError::AccessDenied {
                    resource: "bank_raw".to_string(),
                    message: "User does not have bigquery.tables.updateData permission".to_string(),
                    required_permission: Some("bigquery.tables.updateData".to_string()),
                }));
            }
            if state.fail_merge {
                return Err(IngestError::BigQuery(BigQueryError::InvalidQuery {
                    sql_preview: statement.chars().take(80).collect(),
                    message: "Syntax error".to_string(),
                    location: None,
                }));
            }
        }

        if statement.starts_with("CREATE") {
            let names = backticked_tables(statement);
            if let Some(target) = names.first() {
                let columns = names
                    .get(1)
                    .and_then(|source| state.tables.get(source).cloned())
                    .unwrap_or_default();
                state.tables.insert(target.clone(), columns);
            }
        }

        if statement.starts_with("DROP") {
            for name in backticked_tables(statement) {
                state.tables.remove(&name);
            }
        }
        Ok(())
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>> {
        self.state()
            .tables
            .get(&table.to_string())
            .cloned()
            .ok_or_else(|| {
                IngestError::BigQuery(BigQueryError::TableNotFound {
                    project: PROJECT.to_string(),
                    dataset: table.dataset.clone(),
                    table: table.table.clone(),
                })
            })
    }

    async fn query_scalar(&self, sql: &str) -> Result<Option<String>> {
        let mut state = self.state();
        state.scalar_queries.push(sql.to_string());
        if state.fail_scalars {
            return Err(IngestError::Client("scalar query failed".to_string()));
        }
        Ok(state
            .scalars
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .and_then(|(_, value)| value.clone()))
    }

    async fn insert_rows(&self, table: &TableRef, rows: &[JsonValue]) -> Result<()> {
        let mut state = self.state();
        if state.reject_inserts {
            return Err(billing_rejection());
        }
        for row in rows {
            state.inserted.push((table.clone(), row.clone()));
        }
        Ok(())
    }
}

/// Serves fixed datasets by table name and records extraction order.
#[derive(Clone, Default)]
pub struct FakeSource {
    tables: Arc<HashMap<String, DataFrame>>,
    extracted: Arc<Mutex<Vec<String>>>,
}

impl FakeSource {
    pub fn new(tables: Vec<(&str, DataFrame)>) -> Self {
        Self {
            tables: Arc::new(tables.into_iter().map(|(name, ds)| (name.to_string(), ds)).collect()),
            extracted: Arc::default(),
        }
    }

    pub fn extracted(&self) -> Vec<String> {
        self.extracted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Source for FakeSource {
    async fn extract(&self, table: &str) -> Result<DataFrame> {
        self.extracted.lock().unwrap().push(table.to_string());
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| IngestError::Client(format!("relation \"{}\" does not exist", table)))
    }
}

pub fn frame(columns: Vec<polars::prelude::Column>) -> DataFrame {
    DataFrame::new(columns).unwrap()
}

/// Shared buffer that collects formatted log output.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn dispatch(&self) -> Dispatch {
        let buffer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || buffer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        Dispatch::new(subscriber)
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
