mod connection;
mod loader;
mod table;
mod validator;

pub use connection::{PostgresConfig, WarehouseConfig, DEFAULT_POSTGRES_HOST, DEFAULT_POSTGRES_PORT};
pub use loader::{ConfigLoader, IngestionConfig, DEFAULT_SCHEMAS_PATH, DEFAULT_TABLES_PATH};
pub use table::{MergeStrategy, SchemasConfig, TableSchemaConfig, TableSpec, TablesConfig, DEFAULT_ROWCOUNT_WARNING_PCT};
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
