mod postgres;

use async_trait::async_trait;
use polars::prelude::DataFrame;
use crate::error::Result;

pub use postgres::{bq_type_for, PgSource};

/// Reads a full table out of the operational database.
#[async_trait]
pub trait Source: Send + Sync {
    async fn extract(&self, table: &str) -> Result<DataFrame>;
}
