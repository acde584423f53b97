// CSV Export Engine
// Header row, comma separated, UTF-8, no index column

use super::{timestamped_file_name, ExportError};
use crate::db::infer::infer_rows;
use crate::db::{CellValue, ColumnInfo, LoadStrategy, QueryResult};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// CSV Exporter for query results and serializable records
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvExporter;

impl CsvExporter {
    pub fn new() -> Self {
        Self
    }

    /// Export query results to a file, replacing any file already at `path`
    pub fn export_to_file(&self, path: &Path, columns: &[ColumnInfo], rows: &[Vec<CellValue>]) -> Result<(), ExportError> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::with_capacity(64 * 1024, file); // 64KB buffer

        self.write_csv(writer, columns, rows)
    }

    /// Write `result` to `<dir>/<label>_<YYYYMMDD_HHMMSS>.csv` using the local clock
    pub fn export_labeled(&self, result: &QueryResult, label: &str, dir: &Path) -> Result<PathBuf, ExportError> {
        self.export_labeled_at(result, label, dir, Local::now().naive_local())
    }

    /// Same as [`export_labeled`](Self::export_labeled) with an explicit timestamp.
    /// Two exports of one label within the same second share a name; the later wins.
    pub fn export_labeled_at(
        &self,
        result: &QueryResult,
        label: &str,
        dir: &Path,
        now: NaiveDateTime,
    ) -> Result<PathBuf, ExportError> {
        let path = labeled_path(label, dir, now)?;
        self.export_to_file(&path, &result.columns, &result.rows)?;

        info!(path = %path.display(), rows = result.row_count, "Exported");
        Ok(path)
    }

    /// Write one serializable record as a single-row CSV. The header comes
    /// from the record's serde field names.
    pub fn export_record<T: Serialize>(&self, record: &T, label: &str, dir: &Path) -> Result<PathBuf, ExportError> {
        self.export_record_at(record, label, dir, Local::now().naive_local())
    }

    pub fn export_record_at<T: Serialize>(
        &self,
        record: &T,
        label: &str,
        dir: &Path,
        now: NaiveDateTime,
    ) -> Result<PathBuf, ExportError> {
        let path = labeled_path(label, dir, now)?;
        let mut writer = ::csv::WriterBuilder::new().has_headers(true).from_path(&path)?;
        writer.serialize(record)?;
        writer.flush()?;

        info!(path = %path.display(), rows = 1, "Exported");
        Ok(path)
    }

    fn write_csv<W: Write>(&self, output: W, columns: &[ColumnInfo], rows: &[Vec<CellValue>]) -> Result<(), ExportError> {
        // A result without columns has nothing to describe, not even a header
        if columns.is_empty() {
            return Ok(());
        }

        let mut writer = ::csv::WriterBuilder::new().from_writer(output);
        writer.write_record(columns.iter().map(|col| col.name.as_str()))?;
        for row in rows {
            writer.write_record(row.iter().map(format_cell_value))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Validate the label and create the output directory
fn labeled_path(label: &str, dir: &Path, now: NaiveDateTime) -> Result<PathBuf, ExportError> {
    if label.is_empty() || label.contains(['/', '\\']) || label == "." || label == ".." {
        return Err(ExportError::InvalidLabel(label.to_string()));
    }

    std::fs::create_dir_all(dir)?;
    Ok(dir.join(timestamped_file_name(label, now)))
}

fn format_cell_value(value: &CellValue) -> String {
    match value {
        CellValue::Null => String::new(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(f) if f.is_nan() => String::new(),
        // Whole floats keep one decimal so they read back as floats
        CellValue::Float(f) if f.is_finite() && f.fract() == 0.0 => format!("{:.1}", f),
        CellValue::Float(f) => f.to_string(),
        CellValue::String(s) | CellValue::DateTime(s) => s.clone(),
    }
}

/// Read an exported CSV file back, inferring column types the same way the
/// raw-query load path does. Empty fields become NULL.
pub fn read_csv(path: &Path) -> Result<QueryResult, ExportError> {
    let mut reader = ::csv::ReaderBuilder::new().has_headers(true).from_path(path)?;

    let names: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut raw_rows: Vec<Vec<Option<String>>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        raw_rows.push(
            record
                .iter()
                .map(|field| (!field.is_empty()).then(|| field.to_string()))
                .collect(),
        );
    }

    let (columns, rows) = infer_rows(&names, &raw_rows);
    Ok(QueryResult::new(path.display().to_string(), LoadStrategy::CsvFile).with_data(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", "integer", 0),
            ColumnInfo::new("name", "text", 1),
            ColumnInfo::new("value", "real", 2),
        ]
    }

    fn sample_rows() -> Vec<Vec<CellValue>> {
        vec![
            vec![
                CellValue::Int(1),
                CellValue::String("Alice".to_string()),
                CellValue::Float(100.5),
            ],
            vec![
                CellValue::Int(2),
                CellValue::String("Bob, Jr.".to_string()), // Contains comma
                CellValue::Null,
            ],
            vec![
                CellValue::Int(3),
                CellValue::String("Charlie \"The Great\"".to_string()), // Contains quotes
                CellValue::Float(200.0),
            ],
        ]
    }

    fn sample_result() -> QueryResult {
        QueryResult::new("vw_sample", LoadStrategy::Structured).with_data(sample_columns(), sample_rows())
    }

    fn fixed_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, 30)
            .unwrap()
            .and_hms_opt(23, 59, 1)
            .unwrap()
    }

    fn to_string(columns: &[ColumnInfo], rows: &[Vec<CellValue>]) -> String {
        let mut output = Vec::new();
        CsvExporter::new().write_csv(&mut output, columns, rows).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_csv_export_basic() {
        let csv = to_string(&sample_columns(), &sample_rows());

        assert!(csv.starts_with("id,name,value\n"));
        assert!(csv.contains("1,Alice,100.5\n"));
        assert!(csv.contains("2,\"Bob, Jr.\",\n")); // Comma quoted, NULL empty
        assert!(csv.contains("\"Charlie \"\"The Great\"\"\"")); // Quotes escaped
        assert!(csv.contains(",200.0\n")); // Whole float keeps a decimal
    }

    #[test]
    fn test_empty_result_writes_empty_file() {
        assert!(to_string(&[], &[]).is_empty());
    }

    #[test]
    fn test_lone_empty_field_is_quoted() {
        let columns = vec![ColumnInfo::new("null_count", "integer", 0)];
        let rows = vec![
            vec![CellValue::Int(1)],
            vec![CellValue::Null],
            vec![CellValue::String(String::new())],
        ];

        assert_eq!(to_string(&columns, &rows), "null_count\n1\n\"\"\n\"\"\n");
    }

    #[test]
    fn test_export_labeled_creates_directory_and_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("outputs");

        let path = CsvExporter::new()
            .export_labeled_at(&sample_result(), "sales_export", &out, fixed_now())
            .unwrap();

        assert_eq!(path, out.join("sales_export_20250930_235901.csv"));
        assert!(path.exists());
    }

    #[test]
    fn test_same_label_same_second_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new();

        let first = exporter
            .export_labeled_at(&sample_result(), "deal_size", dir.path(), fixed_now())
            .unwrap();
        let second = exporter
            .export_labeled_at(&QueryResult::empty("vw"), "deal_size", dir.path(), fixed_now())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "");
    }

    #[test]
    fn test_rejects_path_like_labels() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new();

        for label in ["", "../escape", "a/b", ".."] {
            let result = exporter.export_labeled_at(&sample_result(), label, dir.path(), fixed_now());
            assert!(matches!(result, Err(ExportError::InvalidLabel(_))), "label {:?}", label);
        }
    }

    #[test]
    fn test_round_trip_keeps_columns_and_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let original = sample_result();

        let path = CsvExporter::new()
            .export_labeled_at(&original, "sample", dir.path(), fixed_now())
            .unwrap();
        let reloaded = read_csv(&path).unwrap();

        assert_eq!(reloaded.strategy, LoadStrategy::CsvFile);
        assert_eq!(reloaded.column_names(), original.column_names());
        assert_eq!(reloaded.row_count, original.row_count);
        assert_eq!(reloaded.rows[0][0], CellValue::Int(1));
        assert_eq!(reloaded.rows[1][1], CellValue::String("Bob, Jr.".to_string()));
        assert_eq!(reloaded.rows[1][2], CellValue::Null);
        assert_eq!(reloaded.rows[2][1], CellValue::String("Charlie \"The Great\"".to_string()));
        assert_eq!(reloaded.rows[2][2], CellValue::Float(200.0));
    }

    #[test]
    fn test_round_trip_of_single_column_with_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let original = QueryResult::new("vw_null_summary", LoadStrategy::Structured).with_data(
            vec![ColumnInfo::new("null_count", "integer", 0)],
            vec![vec![CellValue::Int(1)], vec![CellValue::Null], vec![CellValue::Int(3)]],
        );

        let path = CsvExporter::new()
            .export_labeled_at(&original, "data_quality", dir.path(), fixed_now())
            .unwrap();
        let reloaded = read_csv(&path).unwrap();

        assert_eq!(reloaded.column_names(), vec!["null_count"]);
        assert_eq!(reloaded.row_count, 3);
        assert_eq!(reloaded.rows[1][0], CellValue::Null);
        assert_eq!(reloaded.rows[2][0], CellValue::Int(3));
    }

    #[test]
    fn test_round_trip_of_empty_result() {
        let dir = tempfile::tempdir().unwrap();

        let path = CsvExporter::new()
            .export_labeled_at(&QueryResult::empty("vw_null_summary"), "data_quality", dir.path(), fixed_now())
            .unwrap();
        let reloaded = read_csv(&path).unwrap();

        assert!(reloaded.columns.is_empty());
        assert_eq!(reloaded.row_count, 0);
    }

    #[derive(Serialize)]
    struct Totals {
        region: &'static str,
        orders: i64,
        #[serde(rename = "share_%")]
        share: f64,
    }

    #[test]
    fn test_export_record_uses_serde_names() {
        let dir = tempfile::tempdir().unwrap();
        let totals = Totals {
            region: "EMEA, North",
            orders: 12,
            share: 40.0,
        };

        let path = CsvExporter::new()
            .export_record_at(&totals, "totals", dir.path(), fixed_now())
            .unwrap();

        assert_eq!(path, dir.path().join("totals_20250930_235901.csv"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "region,orders,share_%\n\"EMEA, North\",12,40.0\n"
        );
    }
}
