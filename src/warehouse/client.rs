use async_trait::async_trait;
use gcp_bigquery_client::Client;
use gcp_bigquery_client::model::dataset::Dataset as BqDataset;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::model::table_row::TableRow;
use polars::prelude::DataFrame;
use serde_json::Value as JsonValue;
use tracing::debug;
use crate::error::{BigQueryError, IngestError, Result, parse_bq_error, ErrorContext};
use super::sql::MAX_STATEMENT_BYTES;
use super::{load_inline, TableRef, Warehouse};

const QUERY_TIMEOUT_MS: i32 = 60_000;
const MAX_POLLS: usize = 60;

#[derive(Clone)]
pub struct BqClient {
    client: Client,
    project_id: String,
}

impl BqClient {
    pub async fn new(project_id: impl Into<String>) -> Result<Self> {
        let client = Client::from_application_default_credentials()
            .await
            .map_err(|e| {
                let ctx = ErrorContext::new().with_operation("client_init");
                IngestError::BigQuery(parse_bq_error(e, ctx))
            })?;

        Ok(Self {
            client,
            project_id: project_id.into(),
        })
    }

    /// Runs a query, polling until the job completes, and returns its first page of rows.
    async fn run_query(&self, sql: &str, operation: &str) -> Result<Vec<TableRow>> {
        let mut request = QueryRequest::new(sql);
        request.timeout_ms = Some(QUERY_TIMEOUT_MS);

        let to_err = |e| {
            let ctx = ErrorContext::new()
                .with_operation(operation)
                .with_sql(sql);
            IngestError::BigQuery(parse_bq_error(e, ctx))
        };

        let response = self.client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(to_err)?;

        if response.job_complete.unwrap_or(true) {
            return Ok(response.rows.unwrap_or_default());
        }

        let job_ref = response.job_reference.ok_or_else(|| {
            IngestError::Client(format!("{}: incomplete job without a job reference", operation))
        })?;
        let job_id = job_ref.job_id.ok_or_else(|| {
            IngestError::Client(format!("{}: incomplete job without a job id", operation))
        })?;

        for attempt in 1..=MAX_POLLS {
            debug!(job_id = %job_id, attempt, "Waiting for BigQuery job");
            let params = GetQueryResultsParameters {
                location: job_ref.location.clone(),
                timeout_ms: Some(QUERY_TIMEOUT_MS),
                ..Default::default()
            };
            let results = self.client
                .job()
                .get_query_results(&self.project_id, &job_id, params)
                .await
                .map_err(to_err)?;

            if results.job_complete.unwrap_or(false) {
                return Ok(results.rows.unwrap_or_default());
            }
        }

        Err(IngestError::BigQuery(BigQueryError::Timeout {
            operation: operation.to_string(),
            duration_ms: Some(QUERY_TIMEOUT_MS as u64 * (MAX_POLLS as u64 + 1)),
        }))
    }
}

fn first_cell(rows: &[TableRow]) -> Option<String> {
    let value = rows
        .first()?
        .columns
        .as_ref()?
        .first()?
        .value
        .as_ref()?;

    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl Warehouse for BqClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn ensure_dataset(&self, dataset: &str) -> Result<()> {
        match self.client.dataset().get(&self.project_id, dataset).await {
            Ok(_) => Ok(()),
            Err(_) => {
                debug!(dataset, "Creating dataset");
                let ds = BqDataset::new(&self.project_id, dataset);
                self.client
                    .dataset()
                    .create(ds)
                    .await
                    .map_err(|e| {
                        let ctx = ErrorContext::new()
                            .with_operation("create_dataset")
                            .with_dataset(&self.project_id, dataset);
                        IngestError::BigQuery(parse_bq_error(e, ctx))
                    })?;
                Ok(())
            }
        }
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        match self.client.table().get(&self.project_id, &table.dataset, &table.table, None).await {
            Ok(_) => Ok(true),
            Err(e) => {
                let ctx = ErrorContext::new()
                    .with_operation("table_exists")
                    .with_table(&self.project_id, &table.dataset, &table.table);
                match parse_bq_error(e, ctx) {
                    BigQueryError::TableNotFound { .. } | BigQueryError::DatasetNotFound { .. } => Ok(false),
                    other => Err(IngestError::BigQuery(other)),
                }
            }
        }
    }

    async fn load_overwrite(&self, table: &TableRef, data: &DataFrame) -> Result<()> {
        load_inline(self, table, data, MAX_STATEMENT_BYTES).await.map(|_| ())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.run_query(sql, "execute").await.map(|_| ())
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>> {
        let tbl = self.client
            .table()
            .get(&self.project_id, &table.dataset, &table.table, None)
            .await
            .map_err(|e| {
                let ctx = ErrorContext::new()
                    .with_operation("table_columns")
                    .with_table(&self.project_id, &table.dataset, &table.table);
                IngestError::BigQuery(parse_bq_error(e, ctx))
            })?;

        Ok(tbl.schema
            .fields
            .unwrap_or_default()
            .into_iter()
            .map(|f| f.name)
            .collect())
    }

    async fn query_scalar(&self, sql: &str) -> Result<Option<String>> {
        let rows = self.run_query(sql, "query_scalar").await?;
        Ok(first_cell(&rows))
    }

    async fn insert_rows(&self, table: &TableRef, rows: &[JsonValue]) -> Result<()> {
        let mut request = TableDataInsertAllRequest::new();
        for row in rows {
            request.add_row(None, row.clone()).map_err(|e| {
                IngestError::BigQuery(parse_bq_error(e, ErrorContext::new().with_operation("insert_rows")))
            })?;
        }

        let response = self.client
            .tabledata()
            .insert_all(&self.project_id, &table.dataset, &table.table, request)
            .await
            .map_err(|e| {
                let ctx = ErrorContext::new()
                    .with_operation("insert_rows")
                    .with_table(&self.project_id, &table.dataset, &table.table);
                IngestError::BigQuery(parse_bq_error(e, ctx))
            })?;

        match response.insert_errors {
            Some(errors) if !errors.is_empty() => Err(IngestError::BigQuery(BigQueryError::InsertRejected {
                table: table.to_string(),
                errors: errors.iter().map(|e| format!("{:?}", e)).collect(),
            })),
            _ => Ok(()),
        }
    }
}
