pub mod error;
pub mod schema;
pub mod dataset;
pub mod config;
pub mod transform;
pub mod source;
pub mod warehouse;
pub mod ingest;
pub mod metrics;

pub use error::{BigQueryError, IngestError, Result, SchemaValidationError};
pub use schema::{BqType, Field};
pub use dataset::{bq_type_of, instant_dtype, instants};
pub use config::{
    ConfigLoader, ConfigValidator, IngestionConfig, MergeStrategy, PostgresConfig,
    SchemasConfig, TableSpec, TablesConfig, ValidationResult, WarehouseConfig,
};
pub use transform::{normalize_dates, parse_instant, validate_schema};
pub use source::{PgSource, Source};
pub use warehouse::{ensure_datasets, load_inline, BqClient, DatasetLayout, TableRef, Warehouse};
pub use ingest::{
    apply_incremental_filter, FilterOutcome, IngestionRunner, ReconcileAction, ReconcileState,
    Reconciler, RunReport, TableRunStats, UpsertOutcome,
};
pub use metrics::{check_rowcount, detect_rowcount_anomaly, emit_metrics, MetricsStore, RowcountAnomaly, RunMetrics};
