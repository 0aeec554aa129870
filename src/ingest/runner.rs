use std::time::Instant;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, info_span, warn, Dispatch, Instrument};
use uuid::Uuid;
use crate::config::{IngestionConfig, SchemasConfig, TableSpec};
use crate::error::{IngestError, Result};
use crate::metrics::{detect_rowcount_anomaly, emit_metrics, MetricsStore, RowcountAnomaly, RunMetrics};
use crate::source::Source;
use crate::transform::{normalize_dates, validate_schema};
use crate::warehouse::{ensure_datasets, DatasetLayout, Warehouse};
use super::incremental::{apply_incremental_filter, FilterOutcome};
use super::reconcile::{ReconcileAction, Reconciler};

#[derive(Debug, Clone)]
pub struct TableRunStats {
    pub table: String,
    pub filter: FilterOutcome,
    pub action: ReconcileAction,
    pub metrics: RunMetrics,
    pub metrics_written: bool,
    pub anomaly: Option<RowcountAnomaly>,
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub tables: Vec<TableRunStats>,
    /// Table whose empty extraction ended the run.
    pub stopped_early: Option<String>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            tables: Vec::new(),
            stopped_early: None,
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableRunStats> {
        self.tables.iter().find(|t| t.table == name)
    }
}

enum TableOutcome {
    Loaded(TableRunStats),
    Empty,
}

/// Runs every configured table, in order, from source to warehouse.
pub struct IngestionRunner {
    source: Box<dyn Source>,
    warehouse: Box<dyn Warehouse>,
    layout: DatasetLayout,
    tables: Vec<TableSpec>,
    schemas: SchemasConfig,
    dispatch: Option<Dispatch>,
}

impl IngestionRunner {
    pub fn new(
        source: Box<dyn Source>,
        warehouse: Box<dyn Warehouse>,
        layout: DatasetLayout,
        config: IngestionConfig,
    ) -> Self {
        Self {
            source,
            warehouse,
            layout,
            tables: config.tables.tables,
            schemas: config.schemas,
            dispatch: None,
        }
    }

    /// Sends this runner's log events to `dispatch` instead of the global default.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    pub async fn run(&self) -> Result<RunReport> {
        match &self.dispatch {
            Some(dispatch) => self.run_instrumented().with_subscriber(dispatch.clone()).await,
            None => self.run_instrumented().await,
        }
    }

    async fn run_instrumented(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        self.run_tables(run_id)
            .instrument(info_span!("ingest", %run_id))
            .await
    }

    async fn run_tables(&self, run_id: Uuid) -> Result<RunReport> {
        if self.tables.is_empty() {
            return Err(IngestError::Config("No tables configured".to_string()));
        }

        info!(tables = self.tables.len(), project = self.warehouse.project_id(), "Starting ingestion run");
        ensure_datasets(self.warehouse.as_ref(), &self.layout).await?;

        let mut report = RunReport::new(run_id);
        for spec in &self.tables {
            let outcome = self
                .process_table(spec)
                .instrument(info_span!("table", table = %spec.name))
                .await;

            match outcome {
                Ok(TableOutcome::Loaded(stats)) => report.tables.push(stats),
                Ok(TableOutcome::Empty) => {
                    warn!(table = %spec.name, "Source table is empty, ending run");
                    report.stopped_early = Some(spec.name.clone());
                    return Ok(report);
                }
                Err(e) => {
                    error!(table = %spec.name, error = %e, "Failed to process table");
                    return Err(IngestError::for_table(&spec.name, e));
                }
            }
        }

        info!(tables = report.tables.len(), "Ingestion run finished");
        Ok(report)
    }

    async fn process_table(&self, spec: &TableSpec) -> Result<TableOutcome> {
        let warehouse = self.warehouse.as_ref();
        info!("Processing table");

        let started = Instant::now();
        let mut data = self.source.extract(&spec.name).await?;
        let extraction = started.elapsed();
        info!(rows = data.height(), "Extracted rows");

        if data.height() == 0 {
            return Ok(TableOutcome::Empty);
        }

        validate_schema(&data, self.schemas.required_columns(&spec.name))?;
        normalize_dates(&mut data, &spec.date_columns)?;

        let permanent = self.layout.permanent(&spec.name);
        let filter = apply_incremental_filter(warehouse, spec, &permanent, &mut data).await?;

        let mut reconciler = Reconciler::new(warehouse, spec, &self.layout);
        reconciler.stage(&data).await?;
        let action = reconciler.reconcile().await?;
        info!(%action, strategy = %spec.merge_strategy, "Reconciled");

        let metrics = emit_metrics(&spec.name, data.height(), extraction, started.elapsed());
        let store = MetricsStore::new(warehouse, &self.layout);
        let metrics_written = match store.write_metrics(&metrics).await {
            Ok(()) => true,
            Err(e) if e.is_policy_rejection() => {
                warn!(error = %e, "Metrics write blocked by warehouse policy, skipping");
                false
            }
            Err(e) => return Err(e),
        };

        let anomaly = detect_rowcount_anomaly(
            &store,
            &spec.name,
            metrics.rows_extracted,
            spec.rowcount_warning_pct,
            metrics.timestamp,
        )
        .await;

        Ok(TableOutcome::Loaded(TableRunStats {
            table: spec.name.clone(),
            filter,
            action,
            metrics,
            metrics_written,
            anomaly,
        }))
    }
}
