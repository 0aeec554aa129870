use gcp_bigquery_client::error::{BQError, ResponseError};
use super::bq_error::{BigQueryError, QueryErrorLocation};
use regex::Regex;

pub fn parse_bq_error(error: BQError, context: ErrorContext) -> BigQueryError {
    match &error {
        BQError::ResponseError { error: resp } => parse_response_error(resp, context),

        BQError::RequestError(req_err) => {
            if req_err.is_timeout() {
                BigQueryError::Timeout {
                    operation: context.operation.unwrap_or_else(|| "request".to_string()),
                    duration_ms: None,
                }
            } else {
                BigQueryError::ConnectionFailed {
                    reason: req_err.to_string(),
                }
            }
        }

        BQError::NoToken => {
            BigQueryError::AuthenticationFailed {
                reason: "No authentication token available".to_string(),
                help: "Ensure you are authenticated with GCP".to_string(),
            }
        }

        BQError::AuthError(auth_err) => {
            BigQueryError::AuthenticationFailed {
                reason: format!("{:?}", auth_err),
                help: "Check your authentication configuration".to_string(),
            }
        }

        BQError::InvalidServiceAccountKey(io_err) => {
            BigQueryError::InvalidCredentials {
                path: std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok(),
                reason: io_err.to_string(),
            }
        }

        BQError::InvalidServiceAccountAuthenticator(io_err) => {
            BigQueryError::InvalidCredentials {
                path: std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok(),
                reason: io_err.to_string(),
            }
        }

        BQError::InvalidApplicationDefaultCredentialsAuthenticator(io_err) => {
            BigQueryError::AuthenticationFailed {
                reason: io_err.to_string(),
                help: "Application default credentials are invalid or not configured".to_string(),
            }
        }

        BQError::SerializationError(serde_err) => {
            BigQueryError::Unknown {
                code: Some("SERIALIZATION".to_string()),
                message: serde_err.to_string(),
                raw_error: error.to_string(),
            }
        }

        _ => BigQueryError::Unknown {
            code: None,
            message: error.to_string(),
            raw_error: format!("{:?}", error),
        }
    }
}

fn parse_response_error(
    resp: &ResponseError,
    context: ErrorContext,
) -> BigQueryError {
    let status = resp.error.code;
    let message = &resp.error.message;
    let reason = resp.error.errors.first().and_then(|e| e.get("reason").map(|s| s.as_str()));

    classify_response(status as i64, reason, message, context)
        .unwrap_or_else(|| BigQueryError::Unknown {
            code: reason.map(|s| s.to_string()).or_else(|| Some(format!("HTTP_{}", status))),
            message: message.clone(),
            raw_error: format!("{:?}", resp),
        })
}

/// Maps an HTTP status, BigQuery reason and message to a known error kind.
/// Returns `None` when nothing more specific than `Unknown` applies.
fn classify_response(
    status: i64,
    reason: Option<&str>,
    message: &str,
    context: ErrorContext,
) -> Option<BigQueryError> {
    let error = match (status, reason) {
        (400, Some("invalidQuery")) | (400, Some("invalid")) => BigQueryError::InvalidQuery {
            sql_preview: context.sql.unwrap_or_default(),
            message: message.to_string(),
            location: extract_query_location(message),
        },

        (400, Some("timeout")) => BigQueryError::Timeout {
            operation: context.operation.unwrap_or_else(|| "query".to_string()),
            duration_ms: None,
        },

        (403, Some("billingNotEnabled")) => BigQueryError::BillingNotEnabled {
            message: message.to_string(),
        },

        (403, Some("accessDenied")) => {
            if mentions_billing(message) {
                BigQueryError::BillingNotEnabled {
                    message: message.to_string(),
                }
            } else {
                BigQueryError::AccessDenied {
                    resource: context.resource.unwrap_or_else(|| "resource".to_string()),
                    message: message.to_string(),
                    required_permission: extract_required_permission(message),
                }
            }
        }

        (403, Some("quotaExceeded")) | (403, Some("rateLimitExceeded")) => {
            BigQueryError::QuotaExceeded {
                quota_type: extract_quota_type(message).unwrap_or_else(|| "API".to_string()),
                message: message.to_string(),
            }
        }

        (403, _) if mentions_billing(message) => BigQueryError::BillingNotEnabled {
            message: message.to_string(),
        },

        (404, _) => return parse_not_found_error(message, &context),

        _ => return None,
    };

    Some(error)
}

fn mentions_billing(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("billing") || lower.contains("free tier")
}

fn parse_not_found_error(message: &str, context: &ErrorContext) -> Option<BigQueryError> {
    let table_re = Regex::new(r"(?i)table\s+([^:\s]+):([^.\s]+)\.([^\s]+)").ok()?;
    if let Some(caps) = table_re.captures(message) {
        return Some(BigQueryError::TableNotFound {
            project: caps[1].to_string(),
            dataset: caps[2].to_string(),
            table: caps[3].to_string(),
        });
    }

    let dataset_re = Regex::new(r"(?i)dataset\s+([^:\s]+):([^\s]+)").ok()?;
    if let Some(caps) = dataset_re.captures(message) {
        return Some(BigQueryError::DatasetNotFound {
            project: caps[1].to_string(),
            dataset: caps[2].to_string(),
        });
    }

    match (&context.project, &context.dataset, &context.table) {
        (Some(project), Some(dataset), Some(table)) => Some(BigQueryError::TableNotFound {
            project: project.clone(),
            dataset: dataset.clone(),
            table: table.clone(),
        }),
        (Some(project), Some(dataset), None) => Some(BigQueryError::DatasetNotFound {
            project: project.clone(),
            dataset: dataset.clone(),
        }),
        _ => None,
    }
}

fn extract_query_location(message: &str) -> Option<QueryErrorLocation> {
    // BigQuery reports positions as "at [line:column]"
    let line_col_re = Regex::new(r"\[(\d+):(\d+)\]").ok()?;
    let caps = line_col_re.captures(message)?;
    Some(QueryErrorLocation {
        line: caps.get(1).and_then(|m| m.as_str().parse().ok()),
        column: caps.get(2).and_then(|m| m.as_str().parse().ok()),
    })
}

fn extract_required_permission(message: &str) -> Option<String> {
    let perm_re = Regex::new(r"(bigquery\.[a-zA-Z.]+[a-zA-Z])").ok()?;
    perm_re.captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_quota_type(message: &str) -> Option<String> {
    let msg_lower = message.to_lowercase();

    if msg_lower.contains("concurrent") {
        Some("concurrent queries".to_string())
    } else if msg_lower.contains("daily") {
        Some("daily query limit".to_string())
    } else if msg_lower.contains("rate") {
        Some("rate limit".to_string())
    } else {
        None
    }
}

#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub sql: Option<String>,
    pub operation: Option<String>,
    pub resource: Option<String>,
    pub project: Option<String>,
    pub dataset: Option<String>,
    pub table: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        let full_sql = sql.into();
        // Staging loads inline every row; keep the preview short
        self.sql = Some(match full_sql.char_indices().nth(500) {
            Some((idx, _)) => format!("{}...", &full_sql[..idx]),
            None => full_sql,
        });
        self
    }

    pub fn with_operation(mut self, op: impl Into<String>) -> Self {
        self.operation = Some(op.into());
        self
    }

    pub fn with_dataset(mut self, project: impl Into<String>, dataset: impl Into<String>) -> Self {
        let project = project.into();
        let dataset = dataset.into();
        self.resource = Some(format!("{}.{}", project, dataset));
        self.project = Some(project);
        self.dataset = Some(dataset);
        self
    }

    pub fn with_table(mut self, project: impl Into<String>, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        let project = project.into();
        let dataset = dataset.into();
        let table = table.into();
        self.resource = Some(format!("{}.{}.{}", project, dataset, table));
        self.project = Some(project);
        self.dataset = Some(dataset);
        self.table = Some(table);
        self
    }
}
