use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use super::recorder::MetricsStore;

/// A swing in extracted rows at or above the table's warning threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct RowcountAnomaly {
    pub table: String,
    pub last: i64,
    pub current: i64,
    pub change_pct: f64,
    pub threshold_pct: f64,
}

/// Compares `current` against the previous count. No previous count, or a
/// previous count of zero, gives no percentage and therefore no anomaly.
pub fn check_rowcount(table: &str, last: Option<i64>, current: i64, threshold_pct: f64) -> Option<RowcountAnomaly> {
    let last = last.filter(|l| *l > 0)?;
    let change_pct = (current - last).abs() as f64 * 100.0 / last as f64;

    (change_pct >= threshold_pct).then(|| RowcountAnomaly {
        table: table.to_string(),
        last,
        current,
        change_pct,
        threshold_pct,
    })
}

/// Looks up the previous count for `table` and warns on a large swing.
/// Lookup failures count as "no prior data"; this never fails the run.
pub async fn detect_rowcount_anomaly(
    store: &MetricsStore<'_>,
    table: &str,
    current: i64,
    threshold_pct: f64,
    before: DateTime<Utc>,
) -> Option<RowcountAnomaly> {
    let last = match store.last_rowcount(table, before).await {
        Ok(last) => last,
        Err(e) => {
            debug!(table, error = %e, "Previous rowcount unavailable");
            None
        }
    };

    let anomaly = check_rowcount(table, last, current, threshold_pct)?;
    warn!(
        table,
        last = anomaly.last,
        current = anomaly.current,
        change_pct = anomaly.change_pct,
        threshold_pct,
        "Rowcount anomaly"
    );
    Some(anomaly)
}
