use polars::prelude::DataFrame;
use crate::dataset::has_column;
use crate::error::SchemaValidationError;

/// Fails with every required column the frame lacks, in declaration order.
pub fn validate_schema(df: &DataFrame, required_columns: &[String]) -> Result<(), SchemaValidationError> {
    let missing: Vec<String> = required_columns
        .iter()
        .filter(|c| !has_column(df, c))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchemaValidationError { missing })
    }
}
