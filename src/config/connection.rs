use sqlx::postgres::{PgConnectOptions, PgSslMode};
use crate::error::{IngestError, Result};
use crate::warehouse::DatasetLayout;

pub const DEFAULT_POSTGRES_HOST: &str = "host.docker.internal";
pub const DEFAULT_POSTGRES_PORT: u16 = 5433;

/// Source database settings, normally read from `POSTGRES_*` variables.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub sslmode: Option<String>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            host: DEFAULT_POSTGRES_HOST.to_string(),
            port: DEFAULT_POSTGRES_PORT,
            database: None,
            sslmode: None,
        }
    }
}

impl PostgresConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let missing: Vec<&str> = [
            ("POSTGRES_USER", &self.user),
            ("POSTGRES_PASSWORD", &self.password),
            ("POSTGRES_DB", &self.database),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(IngestError::Config(format!(
                "Missing Postgres env vars: {}",
                missing.join(", ")
            )));
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(self.user.as_deref().unwrap_or_default())
            .password(self.password.as_deref().unwrap_or_default())
            .database(self.database.as_deref().unwrap_or_default());

        if let Some(mode) = &self.sslmode {
            let mode: PgSslMode = mode
                .parse()
                .map_err(|_| IngestError::Config(format!("Invalid POSTGRES_SSLMODE: '{}'", mode)))?;
            options = options.ssl_mode(mode);
        }

        Ok(options)
    }

    /// Connection target for log lines; never includes the password.
    pub fn display_target(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user.as_deref().unwrap_or("?"),
            self.host,
            self.port,
            self.database.as_deref().unwrap_or("?")
        )
    }
}

/// Warehouse settings, normally read from `BIGQUERY_*` variables.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub project_id: Option<String>,
    pub raw_dataset: String,
    pub staging_dataset: String,
    pub meta_dataset: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            raw_dataset: "bank_raw".to_string(),
            staging_dataset: "bank_raw_staging".to_string(),
            meta_dataset: "bank_meta".to_string(),
        }
    }
}

impl WarehouseConfig {
    pub fn project_id(&self) -> Result<&str> {
        match self.project_id.as_deref() {
            Some(p) if !p.is_empty() => Ok(p),
            _ => Err(IngestError::Config("Missing env var: BIGQUERY_PROJECT_ID".to_string())),
        }
    }

    pub fn layout(&self) -> Result<DatasetLayout> {
        for (name, value) in [
            ("BIGQUERY_DATASET_ID", &self.raw_dataset),
            ("BIGQUERY_STAGING_DATASET_ID", &self.staging_dataset),
            ("BIGQUERY_META_DATASET_ID", &self.meta_dataset),
        ] {
            if value.is_empty() {
                return Err(IngestError::Config(format!("{} must not be empty", name)));
            }
        }

        if self.raw_dataset == self.staging_dataset {
            return Err(IngestError::Config(
                "Raw and staging datasets must differ".to_string(),
            ));
        }

        Ok(DatasetLayout::new(&self.raw_dataset, &self.staging_dataset, &self.meta_dataset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_postgres_env_is_config_error() {
        let err = PostgresConfig::default().connect_options().unwrap_err();
        match err {
            IngestError::Config(msg) => {
                assert!(msg.contains("POSTGRES_USER"));
                assert!(msg.contains("POSTGRES_PASSWORD"));
                assert!(msg.contains("POSTGRES_DB"));
            }
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_only_missing_vars_are_named() {
        let config = PostgresConfig {
            user: Some("etl".into()),
            database: Some("bank".into()),
            ..Default::default()
        };
        let msg = config.connect_options().unwrap_err().to_string();
        assert!(msg.contains("POSTGRES_PASSWORD"));
        assert!(!msg.contains("POSTGRES_USER"));
    }

    #[test]
    fn test_invalid_sslmode() {
        let config = PostgresConfig {
            user: Some("etl".into()),
            password: Some("secret".into()),
            database: Some("bank".into()),
            sslmode: Some("sometimes".into()),
            ..Default::default()
        };
        assert!(config.connect_options().is_err());
    }

    #[test]
    fn test_display_target_hides_password() {
        let config = PostgresConfig {
            user: Some("etl".into()),
            password: Some("secret".into()),
            database: Some("bank".into()),
            ..Default::default()
        };
        let target = config.display_target();
        assert_eq!(target, "etl@host.docker.internal:5433/bank");
        assert!(!target.contains("secret"));
    }

    #[test]
    fn test_missing_project_id() {
        assert!(WarehouseConfig::default().project_id().is_err());
    }

    #[test]
    fn test_layout_defaults() {
        let layout = WarehouseConfig::default().layout().unwrap();
        assert_eq!(layout.permanent("users").dataset, "bank_raw");
        assert_eq!(layout.staging("users").dataset, "bank_raw_staging");
        assert_eq!(layout.meta, "bank_meta");
    }
}
