use std::fs;
use std::path::Path;
use serde::de::DeserializeOwned;
use tracing::warn;
use crate::error::{IngestError, Result};
use super::table::{SchemasConfig, TablesConfig};
use super::validator::ConfigValidator;

pub const DEFAULT_TABLES_PATH: &str = "config/tables.yaml";
pub const DEFAULT_SCHEMAS_PATH: &str = "config/schemas.yaml";

/// Both configuration documents, loaded once at run start.
#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub tables: TablesConfig,
    pub schemas: SchemasConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads and validates both documents. Validation errors are fatal,
    /// warnings are logged.
    pub fn load(tables_path: impl AsRef<Path>, schemas_path: impl AsRef<Path>) -> Result<IngestionConfig> {
        let tables = Self::load_tables(tables_path)?;
        let schemas = Self::load_schemas(schemas_path)?;

        let result = ConfigValidator::validate(&tables);
        for warning in &result.warnings {
            warn!(table = %warning.table, code = warning.code, "{}", warning.message);
        }
        if !result.is_valid() {
            return Err(IngestError::Config(result.error_summary()));
        }

        Ok(IngestionConfig { tables, schemas })
    }

    pub fn load_tables(path: impl AsRef<Path>) -> Result<TablesConfig> {
        Self::load_yaml(path.as_ref())
    }

    pub fn load_schemas(path: impl AsRef<Path>) -> Result<SchemasConfig> {
        Self::load_yaml(path.as_ref())
    }

    pub fn parse_tables(content: &str) -> Result<TablesConfig> {
        Self::parse_yaml(content)
    }

    pub fn parse_schemas(content: &str) -> Result<SchemasConfig> {
        Self::parse_yaml(content)
    }

    fn load_yaml<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)
            .map_err(|e| IngestError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::parse_yaml(&content)
    }

    fn parse_yaml<T: DeserializeOwned + Default>(content: &str) -> Result<T> {
        // An empty document or a bare `null` means "nothing configured"
        if content.trim().is_empty() {
            return Ok(T::default());
        }
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        if value.is_null() {
            return Ok(T::default());
        }
        Ok(serde_yaml::from_value(value)?)
    }
}
