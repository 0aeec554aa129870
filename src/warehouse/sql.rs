//! GoogleSQL rendering for identifiers, literals and inline staging loads.

use chrono::SecondsFormat;
use polars::prelude::{AnyValue, DataFrame};
use crate::dataset::{date_from_days, fields, instant_of};
use crate::error::{IngestError, Result};
use super::TableRef;

/// Upper bound on one statement's text. BigQuery rejects queries over 1 MB.
pub const MAX_STATEMENT_BYTES: usize = 900_000;

pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', ""))
}

pub fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn float_literal(f: f64) -> String {
    if f.is_nan() {
        "CAST('nan' AS FLOAT64)".to_string()
    } else if f.is_infinite() {
        let sign = if f > 0.0 { "" } else { "-" };
        format!("CAST('{}inf' AS FLOAT64)", sign)
    } else {
        format!("{:?}", f)
    }
}

/// GoogleSQL literal for one frame cell.
pub fn literal(value: &AnyValue) -> String {
    match value {
        AnyValue::Null => "NULL".to_string(),
        AnyValue::Boolean(true) => "TRUE".to_string(),
        AnyValue::Boolean(false) => "FALSE".to_string(),
        AnyValue::Int8(v) => v.to_string(),
        AnyValue::Int16(v) => v.to_string(),
        AnyValue::Int32(v) => v.to_string(),
        AnyValue::Int64(v) => v.to_string(),
        AnyValue::UInt8(v) => v.to_string(),
        AnyValue::UInt16(v) => v.to_string(),
        AnyValue::UInt32(v) => v.to_string(),
        AnyValue::UInt64(v) => v.to_string(),
        AnyValue::Float32(v) => float_literal(f64::from(*v)),
        AnyValue::Float64(v) => float_literal(*v),
        AnyValue::String(s) => string_literal(s),
        AnyValue::StringOwned(s) => string_literal(s.as_str()),
        AnyValue::Decimal(..) => format!("NUMERIC '{}'", value),
        AnyValue::Date(days) => match date_from_days(*days) {
            Some(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
            None => "NULL".to_string(),
        },
        AnyValue::Datetime(..) => match instant_of(value) {
            Some(ts) => format!("TIMESTAMP '{}'", ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            None => "NULL".to_string(),
        },
        other => string_literal(&other.to_string()),
    }
}

fn struct_type(data: &DataFrame) -> String {
    let fields: Vec<String> = fields(data)
        .iter()
        .map(|f| format!("{} {}", quote_ident(&f.name), f.field_type.sql_name()))
        .collect();
    format!("STRUCT<{}>", fields.join(", "))
}

/// One row as an anonymous STRUCT. The parenthesized tuple form only means a
/// struct with two or more fields, so single-column rows need the keyword.
fn row_struct(data: &DataFrame, row: usize) -> String {
    let cells: Vec<String> = data
        .get_columns()
        .iter()
        .map(|c| literal(&c.get(row).unwrap_or(AnyValue::Null)))
        .collect();
    format!("STRUCT({})", cells.join(", "))
}

fn unnest_select(struct_type: &str, rows: &[String]) -> String {
    format!("SELECT * FROM UNNEST(ARRAY<{}>[{}])", struct_type, rows.join(",\n"))
}

/// Scratch table holding chunk `index` of a split load into `target`.
pub fn part_table(target: &TableRef, index: usize) -> TableRef {
    TableRef::new(&target.dataset, format!("{}__part{}", target.table, index))
}

/// Statements that overwrite `target` with `data`, all of them DDL.
///
/// Rows that fit into one statement are written with a single
/// `CREATE OR REPLACE ... AS SELECT`. Larger frames are written chunk by chunk
/// into part tables, unioned into `target`, and the parts dropped again.
pub fn staging_statements(project: &str, target: &TableRef, data: &DataFrame) -> Result<Vec<String>> {
    staging_statements_with_limit(project, target, data, MAX_STATEMENT_BYTES)
}

pub fn staging_statements_with_limit(
    project: &str,
    target: &TableRef,
    data: &DataFrame,
    max_bytes: usize,
) -> Result<Vec<String>> {
    if data.width() == 0 {
        return Err(IngestError::Client(format!(
            "Cannot stage {} without columns",
            target
        )));
    }

    let table = target.sql_name(project);
    let struct_type = struct_type(data);
    let overhead = table.len() + struct_type.len() + 96;

    let mut batches: Vec<Vec<String>> = vec![Vec::new()];
    let mut batch_bytes = overhead;
    for row in 0..data.height() {
        let cells = row_struct(data, row);
        let current = batches.last().map(|b| b.len()).unwrap_or(0);
        if current > 0 && batch_bytes + cells.len() + 2 > max_bytes {
            batches.push(Vec::new());
            batch_bytes = overhead;
        }
        batch_bytes += cells.len() + 2;
        if let Some(batch) = batches.last_mut() {
            batch.push(cells);
        }
    }

    if let [rows] = batches.as_slice() {
        return Ok(vec![format!(
            "CREATE OR REPLACE TABLE {} AS\n{}",
            table,
            unnest_select(&struct_type, rows)
        )]);
    }

    let parts: Vec<String> = (0..batches.len())
        .map(|i| part_table(target, i).sql_name(project))
        .collect();

    let mut statements: Vec<String> = batches
        .iter()
        .zip(&parts)
        .map(|(rows, part)| {
            format!(
                "CREATE OR REPLACE TABLE {} AS\n{}",
                part,
                unnest_select(&struct_type, rows)
            )
        })
        .collect();

    let union: Vec<String> = parts.iter().map(|p| format!("SELECT * FROM {}", p)).collect();
    statements.push(format!(
        "CREATE OR REPLACE TABLE {} AS\n{}",
        table,
        union.join("\nUNION ALL\n")
    ));
    statements.extend(parts.iter().map(|p| format!("DROP TABLE IF EXISTS {}", p)));

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{date_column, instant_column};
    use chrono::{NaiveDate, TimeZone, Utc};
    use polars::prelude::{Column, DataType};

    fn target() -> TableRef {
        TableRef::new("stg", "loans")
    }

    #[test]
    fn test_string_literal_escapes() {
        assert_eq!(string_literal("it's"), r"'it\'s'");
        assert_eq!(string_literal("a\\b"), r"'a\\b'");
        assert_eq!(string_literal("line\nbreak"), r"'line\nbreak'");
    }

    #[test]
    fn test_cell_literals() {
        assert_eq!(literal(&AnyValue::Null), "NULL");
        assert_eq!(literal(&AnyValue::Boolean(true)), "TRUE");
        assert_eq!(literal(&AnyValue::Int32(7)), "7");
        assert_eq!(literal(&AnyValue::Float64(1.0)), "1.0");
        assert_eq!(literal(&AnyValue::Float64(f64::NEG_INFINITY)), "CAST('-inf' AS FLOAT64)");
        assert_eq!(literal(&AnyValue::String("o'k")), r"'o\'k'");
    }

    #[test]
    fn test_temporal_literals() {
        let ts = Utc.with_ymd_and_hms(2023, 6, 15, 0, 0, 0).unwrap();
        let df = DataFrame::new(vec![
            instant_column("at", [Some(ts)]).unwrap(),
            date_column("on", [NaiveDate::from_ymd_opt(2023, 1, 2)]).unwrap(),
        ]).unwrap();

        let stmts = staging_statements("p", &target(), &df).unwrap();
        assert!(stmts[0].contains("ARRAY<STRUCT<`at` TIMESTAMP, `on` DATE>>"));
        assert!(stmts[0].contains("STRUCT(TIMESTAMP '2023-06-15T00:00:00.000000Z', DATE '2023-01-02')"));
    }

    #[test]
    fn test_numeric_literal() {
        let df = DataFrame::new(vec![
            Column::new("balance".into(), ["10.50"]).cast(&DataType::Decimal(Some(38), Some(2))).unwrap(),
        ]).unwrap();

        let stmts = staging_statements("p", &target(), &df).unwrap();
        assert!(stmts[0].contains("ARRAY<STRUCT<`balance` NUMERIC>>"));
        assert!(stmts[0].contains("STRUCT(NUMERIC '10.50')"));
    }

    #[test]
    fn test_staging_single_statement() {
        let df = DataFrame::new(vec![
            Column::new("id".into(), [1i64, 2]),
            Column::new("status".into(), [Some("open"), None]),
        ]).unwrap();

        let stmts = staging_statements("p", &target(), &df).unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].starts_with("CREATE OR REPLACE TABLE `p.stg.loans` AS"));
        assert!(stmts[0].contains("ARRAY<STRUCT<`id` INT64, `status` STRING>>"));
        assert!(stmts[0].contains("STRUCT(1, 'open')"));
        assert!(stmts[0].contains("STRUCT(2, NULL)"));
    }

    #[test]
    fn test_single_column_rows_are_structs() {
        let df = DataFrame::new(vec![Column::new("id".into(), [1i64, 2])]).unwrap();

        let stmts = staging_statements("p", &TableRef::new("stg", "t"), &df).unwrap();
        assert_eq!(
            stmts,
            vec!["CREATE OR REPLACE TABLE `p.stg.t` AS\nSELECT * FROM UNNEST(ARRAY<STRUCT<`id` INT64>>[STRUCT(1),\nSTRUCT(2)])"]
        );
    }

    #[test]
    fn test_staging_zero_rows_keeps_schema() {
        let df = DataFrame::new(vec![Column::new("id".into(), Vec::<i64>::new())]).unwrap();
        let stmts = staging_statements("p", &target(), &df).unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].ends_with("ARRAY<STRUCT<`id` INT64>>[])"));
    }

    #[test]
    fn test_split_load_uses_part_tables() {
        let names: Vec<String> = (0..50).map(|i| format!("row-{:04}", i)).collect();
        let df = DataFrame::new(vec![Column::new("name".into(), names)]).unwrap();

        let stmts = staging_statements_with_limit("p", &target(), &df, 400).unwrap();
        let parts = stmts.iter().filter(|s| s.starts_with("CREATE OR REPLACE TABLE `p.stg.loans__part")).count();
        assert!(parts > 1);
        assert_eq!(stmts.len(), parts * 2 + 1);

        let union = &stmts[parts];
        assert!(union.starts_with("CREATE OR REPLACE TABLE `p.stg.loans` AS\nSELECT * FROM `p.stg.loans__part0`\nUNION ALL\n"));
        assert!(stmts[parts + 1..].iter().all(|s| s.starts_with("DROP TABLE IF EXISTS `p.stg.loans__part")));
        assert!(stmts.iter().all(|s| s.starts_with("CREATE") || s.starts_with("DROP")));

        let total: usize = stmts.iter().map(|s| s.matches("'row-").count()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn test_staging_without_columns_fails() {
        assert!(staging_statements("p", &target(), &DataFrame::empty()).is_err());
    }
}
