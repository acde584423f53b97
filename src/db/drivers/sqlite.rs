// SQLite Driver
// Implements DatabaseDriver for SQLite files using rusqlite

use crate::db::infer::infer_rows;
use crate::db::traits::{
    quote_identifier, CellValue, ColumnInfo, Connection, DatabaseConfig, DatabaseDriver, DatabaseError,
    DatabaseType, LoadStrategy, QueryResult,
};
use rusqlite::types::ValueRef;
use rusqlite::{Connection as RusqliteConnection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// SQLite specific connection wrapper
pub struct SqliteConnection {
    pub id: String,
    pub conn: Arc<tokio::sync::Mutex<RusqliteConnection>>,
}

#[async_trait::async_trait]
impl Connection for SqliteConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// SQLite storage classes seen in one column during a structured read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageClass {
    Unknown,
    Integer,
    Real,
    Text,
}

impl StorageClass {
    fn label(self) -> &'static str {
        match self {
            StorageClass::Unknown => "null",
            StorageClass::Integer => "integer",
            StorageClass::Real => "real",
            StorageClass::Text => "text",
        }
    }

    /// Integers widen to reals; any other mix is a decode failure
    fn merge(self, other: StorageClass) -> Option<StorageClass> {
        use StorageClass::*;
        match (self, other) {
            (Unknown, x) | (x, Unknown) => Some(x),
            (a, b) if a == b => Some(a),
            (Integer, Real) | (Real, Integer) => Some(Real),
            _ => None,
        }
    }
}

/// SQLite driver implementation
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver
    pub fn new() -> Self {
        Self
    }

    /// Extract database path from config
    fn get_database_path(config: &DatabaseConfig) -> Result<String, DatabaseError> {
        if config.database.is_empty() {
            return Err(DatabaseError::InvalidConfig(
                "SQLite database path is required".to_string(),
            ));
        }

        // Expand ~ to home directory if present
        let path = match config.database.strip_prefix("~/") {
            Some(rest) => match std::env::var_os("HOME") {
                Some(home) => Path::new(&home).join(rest).to_string_lossy().to_string(),
                None => config.database.clone(),
            },
            None => config.database.clone(),
        };

        Ok(path)
    }

    /// Open SQLite connection; views are only ever read
    fn open_connection(path: &str) -> Result<RusqliteConnection, DatabaseError> {
        RusqliteConnection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Failed to open SQLite database: {}", e)))
    }

    fn downcast(conn: &dyn Connection) -> Result<&SqliteConnection, DatabaseError> {
        conn.as_any()
            .downcast_ref::<SqliteConnection>()
            .ok_or(DatabaseError::InvalidConnection)
    }

    fn query_error(e: rusqlite::Error) -> DatabaseError {
        DatabaseError::QueryError(e.to_string())
    }

    /// Typed cell from a row; blobs and invalid text are left to the raw fallback
    fn typed_cell(value: ValueRef<'_>, column: &str) -> Result<(CellValue, StorageClass), DatabaseError> {
        match value {
            ValueRef::Null => Ok((CellValue::Null, StorageClass::Unknown)),
            ValueRef::Integer(i) => Ok((CellValue::Int(i), StorageClass::Integer)),
            ValueRef::Real(f) => Ok((CellValue::Float(f), StorageClass::Real)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| (CellValue::String(s.to_string()), StorageClass::Text))
                .map_err(|e| DatabaseError::DecodeError {
                    column: column.to_string(),
                    message: e.to_string(),
                }),
            ValueRef::Blob(_) => Err(DatabaseError::UnsupportedType {
                column: column.to_string(),
                data_type: "blob".to_string(),
            }),
        }
    }

    /// Textual rendering of a cell for the raw query path
    fn text_cell(value: ValueRef<'_>) -> Option<String> {
        match value {
            ValueRef::Null => None,
            ValueRef::Integer(i) => Some(i.to_string()),
            // Debug keeps the trailing ".0" so whole reals stay reals after inference
            ValueRef::Real(f) => Some(format!("{:?}", f)),
            ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
            ValueRef::Blob(bytes) => Some(format!(
                "0x{}",
                bytes.iter().map(|b| format!("{:02X}", b)).collect::<String>()
            )),
        }
    }

    fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
        stmt.column_names().iter().map(|s| s.to_string()).collect()
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for SqliteDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        let path = Self::get_database_path(config)?;
        let sqlite_conn = Self::open_connection(&path)?;

        if config.pre_ping {
            sqlite_conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        }

        Ok(Box::new(SqliteConnection {
            id: config.id.clone(),
            conn: Arc::new(tokio::sync::Mutex::new(sqlite_conn)),
        }))
    }

    async fn read_table(&self, conn: &dyn Connection, table: &str) -> Result<QueryResult, DatabaseError> {
        let sqlite_conn = Self::downcast(conn)?;
        let conn_guard = sqlite_conn.conn.lock().await;
        let start = std::time::Instant::now();

        let sql = format!("SELECT * FROM {}", quote_identifier(table));
        let mut stmt = conn_guard.prepare(&sql).map_err(Self::query_error)?;
        let names = Self::column_names(&stmt);
        let mut classes = vec![StorageClass::Unknown; names.len()];

        let mut rows = Vec::new();
        let mut cursor = stmt.query([]).map_err(Self::query_error)?;
        while let Some(row) = cursor.next().map_err(Self::query_error)? {
            let mut cells = Vec::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                let value = row.get_ref(idx).map_err(Self::query_error)?;
                let (cell, class) = Self::typed_cell(value, name)?;
                classes[idx] = classes[idx].merge(class).ok_or_else(|| DatabaseError::DecodeError {
                    column: name.clone(),
                    message: "mixed storage classes".to_string(),
                })?;
                cells.push(cell);
            }
            rows.push(cells);
        }

        // Integer cells in a real column become floats
        for (idx, class) in classes.iter().enumerate() {
            if *class == StorageClass::Real {
                for row in rows.iter_mut() {
                    if let CellValue::Int(i) = &row[idx] {
                        let widened = *i as f64;
                        row[idx] = CellValue::Float(widened);
                    }
                }
            }
        }

        let columns = names
            .iter()
            .zip(&classes)
            .enumerate()
            .map(|(idx, (name, class))| ColumnInfo::new(name.clone(), class.label(), idx))
            .collect();

        debug!(%sql, rows = rows.len(), "structured read finished");
        let mut result = QueryResult::new(table, LoadStrategy::Structured).with_data(columns, rows);
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn execute_query(&self, conn: &dyn Connection, sql: &str) -> Result<QueryResult, DatabaseError> {
        let sqlite_conn = Self::downcast(conn)?;
        let conn_guard = sqlite_conn.conn.lock().await;
        let start = std::time::Instant::now();

        let mut stmt = conn_guard.prepare(sql).map_err(Self::query_error)?;
        let names = Self::column_names(&stmt);

        let mut raw_rows: Vec<Vec<Option<String>>> = Vec::new();
        let mut cursor = stmt.query([]).map_err(Self::query_error)?;
        while let Some(row) = cursor.next().map_err(Self::query_error)? {
            let mut cells = Vec::with_capacity(names.len());
            for idx in 0..names.len() {
                cells.push(Self::text_cell(row.get_ref(idx).map_err(Self::query_error)?));
            }
            raw_rows.push(cells);
        }

        let (columns, rows) = infer_rows(&names, &raw_rows);
        let mut result = QueryResult::new(sql, LoadStrategy::RawQuery).with_data(columns, rows);
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }
}
