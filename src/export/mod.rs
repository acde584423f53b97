// Export Module
// Writes result sets as timestamped CSV files and reads them back

pub mod csv;

pub use self::csv::{read_csv, CsvExporter};

use chrono::NaiveDateTime;
use thiserror::Error;

/// Timestamp suffix of every exported file name
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `<label>_<YYYYMMDD_HHMMSS>.csv`
pub fn timestamped_file_name(label: &str, now: NaiveDateTime) -> String {
    format!("{}_{}.csv", label, now.format(TIMESTAMP_FORMAT))
}

/// Export errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] ::csv::Error),

    #[error("Invalid export label: {0:?}")]
    InvalidLabel(String),
}
