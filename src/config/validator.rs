use std::collections::HashSet;
use super::table::{MergeStrategy, TablesConfig};

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub table: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub code: &'static str,
    pub table: String,
    pub message: String,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| match &e.table {
                Some(t) => format!("[{}] {}: {}", e.code, t, e.message),
                None => format!("[{}] {}", e.code, e.message),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &TablesConfig) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        Self::check_not_empty(config, &mut errors);
        Self::check_duplicate_names(config, &mut errors);
        Self::check_merge_keys(config, &mut errors);
        Self::check_thresholds(config, &mut errors);
        Self::check_incremental_columns(config, &mut warnings);

        ValidationResult { errors, warnings }
    }

    fn check_not_empty(config: &TablesConfig, errors: &mut Vec<ValidationError>) {
        if config.tables.is_empty() {
            errors.push(ValidationError {
                code: "E001",
                table: None,
                message: "No tables configured. Check config/tables.yaml".to_string(),
            });
        }
    }

    fn check_duplicate_names(config: &TablesConfig, errors: &mut Vec<ValidationError>) {
        let mut seen = HashSet::new();
        for table in &config.tables {
            if table.name.trim().is_empty() {
                errors.push(ValidationError {
                    code: "E002",
                    table: None,
                    message: "Table entry with empty name".to_string(),
                });
            } else if !seen.insert(table.name.as_str()) {
                errors.push(ValidationError {
                    code: "E003",
                    table: Some(table.name.clone()),
                    message: "Table configured more than once".to_string(),
                });
            }
        }
    }

    fn check_merge_keys(config: &TablesConfig, errors: &mut Vec<ValidationError>) {
        for table in &config.tables {
            if table.merge_strategy == MergeStrategy::Merge && table.primary_key.is_none() {
                errors.push(ValidationError {
                    code: "E004",
                    table: Some(table.name.clone()),
                    message: "merge_strategy 'merge' requires a primary_key (or use 'replace')".to_string(),
                });
            }
        }
    }

    fn check_thresholds(config: &TablesConfig, errors: &mut Vec<ValidationError>) {
        for table in &config.tables {
            if !table.rowcount_warning_pct.is_finite() || table.rowcount_warning_pct < 0.0 {
                errors.push(ValidationError {
                    code: "E005",
                    table: Some(table.name.clone()),
                    message: format!(
                        "rowcount_warning_pct must be a non-negative number, got {}",
                        table.rowcount_warning_pct
                    ),
                });
            }
        }
    }

    fn check_incremental_columns(config: &TablesConfig, warnings: &mut Vec<ValidationWarning>) {
        for table in &config.tables {
            if table.incremental && table.timestamp_column.is_none() {
                warnings.push(ValidationWarning {
                    code: "W001",
                    table: table.name.clone(),
                    message: "incremental without timestamp_column; every run loads the full table".to_string(),
                });
            }
        }
    }
}
