mod bq_error;
mod parser;

use polars::prelude::PolarsError;
use thiserror::Error;

pub use bq_error::{BigQueryError, QueryErrorLocation};
pub use parser::{parse_bq_error, ErrorContext};

/// Required columns absent from an extracted dataset. Lists every missing
/// column in the order they were declared.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Missing required columns: {}", .missing.join(", "))]
pub struct SchemaValidationError {
    pub missing: Vec<String>,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("BigQuery error: {0}")]
    BigQuery(#[from] BigQueryError),

    #[error("BigQuery client error: {0}")]
    Client(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(#[from] SchemaValidationError),

    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] PolarsError),

    #[error("Unsupported source column '{column}' of type {type_name}")]
    UnsupportedColumn { column: String, type_name: String },

    #[error("Reconciliation error: {0}")]
    Reconcile(String),

    #[error("Watermark error: {0}")]
    Watermark(String),

    #[error("Failed to process {table}: {source}")]
    Table {
        table: String,
        #[source]
        source: Box<IngestError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IngestError {
    pub fn for_table(table: impl Into<String>, source: IngestError) -> Self {
        IngestError::Table {
            table: table.into(),
            source: Box::new(source),
        }
    }

    /// True when the warehouse refused the operation for billing or permission
    /// reasons rather than because the operation itself was wrong.
    pub fn is_policy_rejection(&self) -> bool {
        match self {
            IngestError::BigQuery(bq) => bq.is_policy_rejection(),
            IngestError::Table { source, .. } => source.is_policy_rejection(),
            _ => false,
        }
    }

    /// The underlying BigQuery error, looking through table context.
    pub fn bigquery(&self) -> Option<&BigQueryError> {
        match self {
            IngestError::BigQuery(bq) => Some(bq),
            IngestError::Table { source, .. } => source.bigquery(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_validation_lists_all_missing() {
        let err = SchemaValidationError {
            missing: vec!["id".into(), "created_at".into()],
        };
        assert_eq!(err.to_string(), "Missing required columns: id, created_at");
    }

    #[test]
    fn test_policy_rejection_through_table_context() {
        let err = IngestError::for_table(
            "loans",
            IngestError::BigQuery(BigQueryError::BillingNotEnabled {
                message: "DML queries are not allowed in the free tier".into(),
            }),
        );
        assert!(err.is_policy_rejection());
        assert!(err.to_string().starts_with("Failed to process loans"));
        assert_eq!(err.bigquery().map(|e| e.error_code()), Some("BILLING_NOT_ENABLED"));
    }

    #[test]
    fn test_generic_failure_is_not_policy_rejection() {
        let err = IngestError::BigQuery(BigQueryError::Timeout {
            operation: "merge".into(),
            duration_ms: None,
        });
        assert!(!err.is_policy_rejection());
        assert!(!IngestError::Config("x".into()).is_policy_rejection());
    }
}
