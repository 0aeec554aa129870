mod anomaly;
mod recorder;

pub use anomaly::{check_rowcount, detect_rowcount_anomaly, RowcountAnomaly};
pub use recorder::{emit_metrics, MetricsStore, RunMetrics, METRICS_TABLE};
