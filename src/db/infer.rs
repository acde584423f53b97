// Column Type Inference
// Turns textual values (raw query rows, CSV fields) into typed cells, one column at a time

use crate::db::traits::{CellValue, ColumnInfo};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Int,
    Float,
    Bool,
    Date,
    Timestamp,
    Text,
}

impl Kind {
    fn label(self) -> &'static str {
        match self {
            Kind::Int => "bigint",
            Kind::Float => "double precision",
            Kind::Bool => "boolean",
            Kind::Date => "date",
            Kind::Timestamp => "timestamp",
            Kind::Text => "text",
        }
    }

    fn accepts(self, value: &str) -> bool {
        match self {
            Kind::Int => value.parse::<i64>().is_ok(),
            Kind::Float => parse_decimal(value).is_some(),
            Kind::Bool => parse_bool(value).is_some(),
            Kind::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
            Kind::Timestamp => is_timestamp(value),
            Kind::Text => true,
        }
    }

    fn convert(self, value: &str) -> CellValue {
        match self {
            Kind::Int => value.parse().map(CellValue::Int).unwrap_or(CellValue::Null),
            Kind::Float => parse_decimal(value).map(CellValue::Float).unwrap_or(CellValue::Null),
            Kind::Bool => parse_bool(value).map(CellValue::Bool).unwrap_or(CellValue::Null),
            Kind::Date | Kind::Timestamp => CellValue::DateTime(value.to_string()),
            Kind::Text => CellValue::String(value.to_string()),
        }
    }
}

// Narrowest first
const CANDIDATES: [Kind; 6] = [Kind::Int, Kind::Float, Kind::Bool, Kind::Date, Kind::Timestamp, Kind::Text];

/// A finite decimal number. Rejects the `NaN`/`inf` spellings `f64::from_str` allows.
pub fn parse_decimal(value: &str) -> Option<f64> {
    if !value.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "t" | "true" => Some(true),
        "f" | "false" => Some(false),
        _ => None,
    }
}

fn is_timestamp(value: &str) -> bool {
    const NAIVE: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    const ZONED: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

    NAIVE.iter().any(|f| NaiveDateTime::parse_from_str(value, f).is_ok())
        || ZONED.iter().any(|f| DateTime::parse_from_str(value, f).is_ok())
}

/// Infer one column's type from its textual values and convert them.
/// `None` is SQL NULL; it never influences the inferred type.
pub fn infer_column(values: &[Option<&str>]) -> (&'static str, Vec<CellValue>) {
    let kind = if values.iter().all(Option::is_none) {
        Kind::Text
    } else {
        CANDIDATES
            .iter()
            .copied()
            .find(|kind| values.iter().flatten().all(|v| kind.accepts(v)))
            .unwrap_or(Kind::Text)
    };

    let cells = values
        .iter()
        .map(|v| match v {
            Some(text) => kind.convert(text),
            None => CellValue::Null,
        })
        .collect();

    (kind.label(), cells)
}

/// Infer every column of a textual result set and rebuild typed rows.
/// Short rows are padded with NULL.
pub fn infer_rows(names: &[String], raw_rows: &[Vec<Option<String>>]) -> (Vec<ColumnInfo>, Vec<Vec<CellValue>>) {
    let mut columns = Vec::with_capacity(names.len());
    let mut rows: Vec<Vec<CellValue>> = (0..raw_rows.len())
        .map(|_| Vec::with_capacity(names.len()))
        .collect();

    for (idx, name) in names.iter().enumerate() {
        let values: Vec<Option<&str>> = raw_rows
            .iter()
            .map(|row| row.get(idx).and_then(|v| v.as_deref()))
            .collect();

        let (data_type, cells) = infer_column(&values);
        columns.push(ColumnInfo::new(name.clone(), data_type, idx));

        for (row, cell) in rows.iter_mut().zip(cells) {
            row.push(cell);
        }
    }

    (columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_column() {
        let (data_type, cells) = infer_column(&[Some("2025"), None, Some("-3")]);
        assert_eq!(data_type, "bigint");
        assert_eq!(cells, vec![CellValue::Int(2025), CellValue::Null, CellValue::Int(-3)]);
    }

    #[test]
    fn test_mixed_int_and_decimal_promotes_to_float() {
        let (data_type, cells) = infer_column(&[Some("1000"), Some("1200.50")]);
        assert_eq!(data_type, "double precision");
        assert_eq!(cells, vec![CellValue::Float(1000.0), CellValue::Float(1200.5)]);
    }

    #[test]
    fn test_postgres_boolean_text() {
        let (data_type, cells) = infer_column(&[Some("t"), Some("f")]);
        assert_eq!(data_type, "boolean");
        assert_eq!(cells, vec![CellValue::Bool(true), CellValue::Bool(false)]);
    }

    #[test]
    fn test_dates_and_timestamps() {
        let (data_type, _) = infer_column(&[Some("2025-08-01"), Some("2025-09-01")]);
        assert_eq!(data_type, "date");

        let (data_type, cells) = infer_column(&[Some("2025-08-01 10:15:00+00"), Some("2025-08-02 00:00:00.5+02")]);
        assert_eq!(data_type, "timestamp");
        assert_eq!(cells[0], CellValue::DateTime("2025-08-01 10:15:00+00".to_string()));
    }

    #[test]
    fn test_nan_and_infinity_names_stay_text() {
        let (data_type, cells) = infer_column(&[Some("Nan"), Some("inf")]);
        assert_eq!(data_type, "text");
        assert_eq!(cells[0], CellValue::String("Nan".to_string()));

        let (data_type, _) = infer_column(&[Some("1.5"), Some("-Infinity")]);
        assert_eq!(data_type, "text");

        assert_eq!(parse_decimal("1e3"), Some(1000.0));
        assert_eq!(parse_decimal("1e999"), None);
        assert_eq!(parse_decimal("NaN"), None);
    }

    #[test]
    fn test_text_wins_on_any_non_numeric_value() {
        let (data_type, cells) = infer_column(&[Some("12"), Some("Motorcycles")]);
        assert_eq!(data_type, "text");
        assert_eq!(cells[0], CellValue::String("12".to_string()));
    }

    #[test]
    fn test_infer_rows_pads_short_rows() {
        let names = vec!["product".to_string(), "amount_usd".to_string()];
        let raw = vec![
            vec![Some("A".to_string()), Some("100".to_string())],
            vec![Some("B".to_string())],
        ];
        let (columns, rows) = infer_rows(&names, &raw);
        assert_eq!(columns[1].name, "amount_usd");
        assert_eq!(columns[1].ordinal_position, 1);
        assert_eq!(rows[1], vec![CellValue::String("B".to_string()), CellValue::Null]);
    }
}
