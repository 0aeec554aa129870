use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_ROWCOUNT_WARNING_PCT: f64 = 30.0;

/// How staged rows reach an existing permanent table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Upsert by primary key, falling back to replace on policy rejection.
    #[default]
    Merge,
    /// Rewrite the whole permanent table from staging.
    Replace,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Merge => "merge",
            MergeStrategy::Replace => "replace",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_rowcount_warning_pct() -> f64 {
    DEFAULT_ROWCOUNT_WARNING_PCT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub timestamp_column: Option<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
    #[serde(default)]
    pub date_columns: Vec<String>,
    #[serde(default = "default_rowcount_warning_pct")]
    pub rowcount_warning_pct: f64,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            incremental: false,
            timestamp_column: None,
            primary_key: None,
            merge_strategy: MergeStrategy::default(),
            date_columns: Vec::new(),
            rowcount_warning_pct: DEFAULT_ROWCOUNT_WARNING_PCT,
        }
    }

    pub fn incremental_on(mut self, timestamp_column: impl Into<String>) -> Self {
        self.incremental = true;
        self.timestamp_column = Some(timestamp_column.into());
        self
    }

    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = Some(key.into());
        self
    }

    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    pub fn with_date_columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.date_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rowcount_warning_pct(mut self, pct: f64) -> Self {
        self.rowcount_warning_pct = pct;
        self
    }

    /// The watermark column when incremental filtering applies to this table.
    pub fn incremental_column(&self) -> Option<&str> {
        if self.incremental {
            self.timestamp_column.as_deref()
        } else {
            None
        }
    }
}

/// Contents of the tables document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TablesConfig {
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TableSchemaConfig {
    #[serde(default)]
    pub required_columns: Vec<String>,
}

/// Contents of the schemas document, keyed by table name.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SchemasConfig {
    pub tables: HashMap<String, TableSchemaConfig>,
}

impl SchemasConfig {
    pub fn with_required(mut self, table: impl Into<String>, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tables.insert(
            table.into(),
            TableSchemaConfig {
                required_columns: columns.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn required_columns(&self, table: &str) -> &[String] {
        self.tables
            .get(table)
            .map(|s| s.required_columns.as_slice())
            .unwrap_or(&[])
    }
}
