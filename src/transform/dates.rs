use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};
use polars::prelude::{AnyValue, Column, DataFrame};
use tracing::warn;
use crate::dataset::{instant_column, instant_dtype, instant_of};
use crate::error::Result;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Nulls introduced while coercing one date column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateCoercion {
    pub column: String,
    pub coerced_to_null: usize,
}

/// Truncates to microseconds, the precision BigQuery stores for TIMESTAMP.
/// Every instant compared or staged goes through here first.
pub fn canonical(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Parses the textual instant forms seen in source rows and in BigQuery
/// query results. Naive values are taken as UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(canonical(dt.with_timezone(&Utc)));
    }

    let (body, utc_suffix) = match s.strip_suffix(" UTC").or_else(|| s.strip_suffix('Z')) {
        Some(stripped) => (stripped, true),
        None => (s, false),
    };

    if !utc_suffix {
        for fmt in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(body, fmt) {
                return Some(canonical(dt.with_timezone(&Utc)));
            }
        }
    }

    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(body, fmt) {
            return Some(canonical(Utc.from_utc_datetime(&naive)));
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(body, fmt) {
            return date_to_instant(date);
        }
    }

    // BigQuery returns TIMESTAMP cells as epoch seconds, e.g. "1.6855776E9"
    if s.contains(['E', 'e']) {
        if let Ok(secs) = s.parse::<f64>() {
            return from_epoch_seconds(secs);
        }
    }

    None
}

fn date_to_instant(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64)
}

/// Reads one cell as a canonical instant. Text is parsed, numbers are epoch
/// seconds, anything else has no instant.
pub fn coerce_value(value: &AnyValue) -> Option<DateTime<Utc>> {
    match value {
        AnyValue::Datetime(..) | AnyValue::Date(_) => instant_of(value),
        AnyValue::String(s) => parse_instant(s),
        AnyValue::StringOwned(s) => parse_instant(s.as_str()),
        AnyValue::Int8(v) => from_epoch_seconds(f64::from(*v)),
        AnyValue::Int16(v) => from_epoch_seconds(f64::from(*v)),
        AnyValue::Int32(v) => from_epoch_seconds(f64::from(*v)),
        AnyValue::Int64(v) => from_epoch_seconds(*v as f64),
        AnyValue::UInt32(v) => from_epoch_seconds(f64::from(*v)),
        AnyValue::UInt64(v) => from_epoch_seconds(*v as f64),
        AnyValue::Float32(v) => from_epoch_seconds(f64::from(*v)),
        AnyValue::Float64(v) => from_epoch_seconds(*v),
        _ => None,
    }
}

/// Returns the column recast to UTC instants and how many non-null inputs became null.
pub fn coerce_column(column: &Column) -> Result<(Column, usize)> {
    if column.dtype() == &instant_dtype() {
        return Ok((column.clone(), 0));
    }

    let mut introduced = 0;
    let mut instants = Vec::with_capacity(column.len());
    for idx in 0..column.len() {
        let value = column.get(idx).unwrap_or(AnyValue::Null);
        let instant = coerce_value(&value);
        if instant.is_none() && !value.is_null() {
            introduced += 1;
        }
        instants.push(instant);
    }

    Ok((instant_column(column.name().as_str(), instants)?, introduced))
}

/// Converts each listed column present in the frame to UTC instants.
/// Absent columns are skipped. Unparsable values become null with a warning.
pub fn normalize_dates(df: &mut DataFrame, date_columns: &[String]) -> Result<Vec<DateCoercion>> {
    let mut report = Vec::new();

    for name in date_columns {
        let Ok(column) = df.column(name) else {
            continue;
        };

        let (coerced, introduced) = coerce_column(column)?;
        df.with_column(coerced)?;

        if introduced > 0 {
            warn!(column = %name, nulls = introduced, "Date coercion produced nulls");
        }
        report.push(DateCoercion {
            column: name.clone(),
            coerced_to_null: introduced,
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        assert_eq!(parse_instant("2023-06-01T03:00:00+03:00"), Some(utc(2023, 6, 1, 0, 0, 0)));
        assert_eq!(parse_instant("2023-06-01T00:00:00Z"), Some(utc(2023, 6, 1, 0, 0, 0)));
    }

    #[test]
    fn test_parse_bigquery_string_cast() {
        assert_eq!(parse_instant("2023-06-01 00:00:00+00"), Some(utc(2023, 6, 1, 0, 0, 0)));
        assert_eq!(parse_instant("2023-06-01 12:30:00.5+00"), Some(utc(2023, 6, 1, 12, 30, 0) + chrono::Duration::milliseconds(500)));
        assert_eq!(parse_instant("2023-06-01 00:00:00 UTC"), Some(utc(2023, 6, 1, 0, 0, 0)));
    }

    #[test]
    fn test_parse_naive_and_dates() {
        assert_eq!(parse_instant("2023-05-30 10:15:00"), Some(utc(2023, 5, 30, 10, 15, 0)));
        assert_eq!(parse_instant("2023-05-30"), Some(utc(2023, 5, 30, 0, 0, 0)));
        assert_eq!(parse_instant("2023/05/30"), Some(utc(2023, 5, 30, 0, 0, 0)));
    }

    #[test]
    fn test_parse_epoch_scientific() {
        assert_eq!(parse_instant("1.6855776E9"), Some(utc(2023, 6, 1, 0, 0, 0)));
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_instant("not a date"), None);
        assert_eq!(parse_instant(""), None);
        assert_eq!(parse_instant("2023-13-45"), None);
    }

    #[test]
    fn test_canonical_truncates_to_micros() {
        let ts = utc(2023, 1, 1, 0, 0, 0) + chrono::Duration::nanoseconds(1_234_567);
        assert_eq!(canonical(ts), utc(2023, 1, 1, 0, 0, 0) + chrono::Duration::microseconds(1_234));
    }

    #[test]
    fn test_coerce_value_kinds() {
        assert_eq!(coerce_value(&AnyValue::Date(19_389)), Some(utc(2023, 2, 1, 0, 0, 0)));
        assert_eq!(coerce_value(&AnyValue::Int64(0)), Some(utc(1970, 1, 1, 0, 0, 0)));
        assert_eq!(coerce_value(&AnyValue::String("2023-02-01")), Some(utc(2023, 2, 1, 0, 0, 0)));
        assert_eq!(coerce_value(&AnyValue::Boolean(true)), None);
        assert_eq!(coerce_value(&AnyValue::Null), None);
    }

    #[test]
    fn test_coerce_column_counts_only_introduced_nulls() {
        let column = Column::new("created_at".into(), [Some("2023-01-01"), Some("garbage"), None]);
        let (coerced, introduced) = coerce_column(&column).unwrap();
        assert_eq!(introduced, 1);
        assert_eq!(coerced.dtype(), &instant_dtype());
        assert_eq!(coerced.null_count(), 2);
        assert_eq!(coerced.name().as_str(), "created_at");
    }

    #[test]
    fn test_normalize_skips_absent_columns() {
        let mut df = DataFrame::new(vec![
            Column::new("id".into(), [1i64, 2]),
            Column::new("opened_at".into(), ["2023-01-05", "not a date"]),
        ]).unwrap();

        let report = normalize_dates(&mut df, &["opened_at".to_string(), "closed_at".to_string()]).unwrap();

        assert_eq!(report, vec![DateCoercion { column: "opened_at".into(), coerced_to_null: 1 }]);
        assert_eq!(df.column("opened_at").unwrap().dtype(), &instant_dtype());
        assert_eq!(df.column("id").unwrap().dtype(), &polars::prelude::DataType::Int64);
        assert!(!crate::dataset::has_column(&df, "closed_at"));
    }
}
