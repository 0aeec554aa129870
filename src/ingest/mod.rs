mod incremental;
mod reconcile;
mod runner;

pub use incremental::{apply_incremental_filter, current_watermark, retain_newer, watermark_sql, FilterOutcome};
pub use reconcile::{
    materialize_sql, merge_sql, replace_sql,
    ReconcileAction, ReconcileState, Reconciler, UpsertOutcome,
};
pub use runner::{IngestionRunner, RunReport, TableRunStats};
