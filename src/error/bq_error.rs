use std::fmt;

#[derive(Debug, Clone)]
pub enum BigQueryError {
    AuthenticationFailed {
        reason: String,
        help: String,
    },

    InvalidQuery {
        sql_preview: String,
        message: String,
        location: Option<QueryErrorLocation>,
    },

    TableNotFound {
        project: String,
        dataset: String,
        table: String,
    },

    DatasetNotFound {
        project: String,
        dataset: String,
    },

    AccessDenied {
        resource: String,
        message: String,
        required_permission: Option<String>,
    },

    /// The project has no billing account attached (BigQuery sandbox).
    /// DML statements such as MERGE are refused in this mode.
    BillingNotEnabled {
        message: String,
    },

    QuotaExceeded {
        quota_type: String,
        message: String,
    },

    Timeout {
        operation: String,
        duration_ms: Option<u64>,
    },

    /// A streaming insert was accepted by the API but some rows were refused.
    InsertRejected {
        table: String,
        errors: Vec<String>,
    },

    ConnectionFailed {
        reason: String,
    },

    InvalidCredentials {
        path: Option<String>,
        reason: String,
    },

    Unknown {
        code: Option<String>,
        message: String,
        raw_error: String,
    },
}

#[derive(Debug, Clone)]
pub struct QueryErrorLocation {
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl BigQueryError {
    /// Refusals caused by the project's billing tier. These are recoverable
    /// for MERGE (replace instead) and for metrics streaming (skip the write).
    /// A plain missing permission is not one of them.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, BigQueryError::BillingNotEnabled { .. })
    }

    pub fn suggestion(&self) -> String {
        match self {
            BigQueryError::AuthenticationFailed { .. } => {
                "Try:\n  \
                 • Run: gcloud auth application-default login\n  \
                 • Or set GOOGLE_APPLICATION_CREDENTIALS to your service account key file".to_string()
            }

            BigQueryError::InvalidQuery { .. } => {
                "Check the generated SQL for:\n  \
                 • Column names in config/tables.yaml that do not exist in the source\n  \
                 • A primary_key missing from the staging table\n  \
                 • Reserved words used as column names".to_string()
            }

            BigQueryError::TableNotFound { project, dataset, table } => {
                format!(
                    "Verify the table exists:\n  \
                     • Run: bq show {project}:{dataset}.{table}\n  \
                     • Run: bqingest init to create the metrics table"
                )
            }

            BigQueryError::DatasetNotFound { project, dataset } => {
                format!(
                    "Verify the dataset exists:\n  \
                     • Run: bq show {project}:{dataset}\n  \
                     • Run: bqingest init to create the raw, staging and meta datasets"
                )
            }

            BigQueryError::AccessDenied { resource, required_permission, .. } => {
                let perm = required_permission.as_deref().unwrap_or("bigquery.tables.updateData");
                format!(
                    "Request access to {resource}:\n  \
                     • Required permission: {perm}\n  \
                     • Or grant roles/bigquery.dataEditor on the target dataset"
                )
            }

            BigQueryError::BillingNotEnabled { .. } => {
                "The project runs in the BigQuery sandbox:\n  \
                 • MERGE falls back to a full table replace\n  \
                 • Metrics writes are skipped\n  \
                 • Attach a billing account to enable both".to_string()
            }

            BigQueryError::QuotaExceeded { quota_type, .. } => {
                format!(
                    "Quota '{quota_type}' exceeded:\n  \
                     • Wait and retry later\n  \
                     • Request quota increase in Cloud Console"
                )
            }

            BigQueryError::Timeout { operation, .. } => {
                format!(
                    "Operation '{operation}' timed out:\n  \
                     • Retry the run\n  \
                     • Consider marking large tables as incremental"
                )
            }

            BigQueryError::InsertRejected { table, .. } => {
                format!(
                    "Rows were refused by {table}:\n  \
                     • Compare the row payload with the table schema\n  \
                     • Run: bq show --schema {table}"
                )
            }

            BigQueryError::ConnectionFailed { .. } => {
                "Connection failed:\n  \
                 • Check your internet connection\n  \
                 • Verify BigQuery API is enabled for your project".to_string()
            }

            BigQueryError::InvalidCredentials { path, .. } => {
                let path_info = path.as_ref()
                    .map(|p| format!(" ({})", p))
                    .unwrap_or_default();
                format!(
                    "Invalid credentials{path_info}:\n  \
                     • Check GOOGLE_APPLICATION_CREDENTIALS path\n  \
                     • Run: gcloud auth application-default login"
                )
            }

            BigQueryError::Unknown { .. } => {
                "An unexpected error occurred:\n  \
                 • Check the error message for details\n  \
                 • Check BigQuery status: https://status.cloud.google.com/".to_string()
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            BigQueryError::AuthenticationFailed { .. } => "AUTH_FAILED",
            BigQueryError::InvalidQuery { .. } => "INVALID_QUERY",
            BigQueryError::TableNotFound { .. } => "TABLE_NOT_FOUND",
            BigQueryError::DatasetNotFound { .. } => "DATASET_NOT_FOUND",
            BigQueryError::AccessDenied { .. } => "ACCESS_DENIED",
            BigQueryError::BillingNotEnabled { .. } => "BILLING_NOT_ENABLED",
            BigQueryError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            BigQueryError::Timeout { .. } => "TIMEOUT",
            BigQueryError::InsertRejected { .. } => "INSERT_REJECTED",
            BigQueryError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            BigQueryError::InvalidCredentials { .. } => "INVALID_CREDENTIALS",
            BigQueryError::Unknown { .. } => "UNKNOWN",
        }
    }
}

impl fmt::Display for BigQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BigQueryError::AuthenticationFailed { reason, .. } => {
                write!(f, "Authentication failed: {reason}")
            }

            BigQueryError::InvalidQuery { message, sql_preview, location } => {
                write!(f, "Invalid SQL: {message}")?;
                if let Some(loc) = location {
                    if let Some(line) = loc.line {
                        write!(f, " (line {line}")?;
                        if let Some(col) = loc.column {
                            write!(f, ", column {col}")?;
                        }
                        write!(f, ")")?;
                    }
                }
                if !sql_preview.is_empty() {
                    write!(f, "\n\nSQL preview:\n  {sql_preview}")?;
                }
                Ok(())
            }

            BigQueryError::TableNotFound { project, dataset, table } => {
                write!(f, "Table not found: {project}.{dataset}.{table}")
            }

            BigQueryError::DatasetNotFound { project, dataset } => {
                write!(f, "Dataset not found: {project}.{dataset}")
            }

            BigQueryError::AccessDenied { resource, required_permission, .. } => {
                write!(f, "Access denied to {resource}")?;
                if let Some(perm) = required_permission {
                    write!(f, " (requires {perm})")?;
                }
                Ok(())
            }

            BigQueryError::BillingNotEnabled { message } => {
                write!(f, "Billing not enabled: {message}")
            }

            BigQueryError::QuotaExceeded { quota_type, message } => {
                write!(f, "Quota exceeded ({quota_type}): {message}")
            }

            BigQueryError::Timeout { operation, duration_ms } => {
                write!(f, "Timeout during {operation}")?;
                if let Some(ms) = duration_ms {
                    write!(f, " (after {}ms)", ms)?;
                }
                Ok(())
            }

            BigQueryError::InsertRejected { table, errors } => {
                write!(f, "{} row(s) rejected by {table}", errors.len())?;
                if let Some(first) = errors.first() {
                    write!(f, ": {first}")?;
                }
                Ok(())
            }

            BigQueryError::ConnectionFailed { reason } => {
                write!(f, "Connection failed: {reason}")
            }

            BigQueryError::InvalidCredentials { reason, path } => {
                write!(f, "Invalid credentials: {reason}")?;
                if let Some(p) = path {
                    write!(f, " (path: {p})")?;
                }
                Ok(())
            }

            BigQueryError::Unknown { code, message, .. } => {
                if let Some(c) = code {
                    write!(f, "BigQuery error [{c}]: {message}")
                } else {
                    write!(f, "BigQuery error: {message}")
                }
            }
        }
    }
}

impl std::error::Error for BigQueryError {}
