// Database Driver Traits
// Core abstraction over the databases the pipeline can read views from

use crate::db::infer::parse_decimal;

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    Sqlite,
    Postgresql,
}

impl DatabaseType {
    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "SQLite",
            DatabaseType::Postgresql => "PostgreSQL",
        }
    }

    /// Default port for the database type
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Sqlite => 0, // File-based, no port
            DatabaseType::Postgresql => 5432,
        }
    }

    /// Parse the `DB_TYPE` setting
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Some(DatabaseType::Postgresql),
            "sqlite" | "sqlite3" => Some(DatabaseType::Sqlite),
            _ => None,
        }
    }
}

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Driver not found for database type: {0:?}")]
    DriverNotFound(DatabaseType),

    #[error("Query execution error: {0}")]
    QueryError(String),

    #[error("Unsupported column type '{data_type}' in column '{column}'")]
    UnsupportedType { column: String, data_type: String },

    #[error("Failed to decode column '{column}': {message}")]
    DecodeError { column: String, message: String },

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Invalid connection type")]
    InvalidConnection,

    #[error("Pool error: {0}")]
    PoolError(String),
}

impl DatabaseError {
    /// Whether a failed structured read may be retried as a raw query.
    /// Connection-level failures are not: the raw query would hit the same wall.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DatabaseError::QueryError(_)
                | DatabaseError::UnsupportedType { .. }
                | DatabaseError::DecodeError { .. }
        )
    }
}

/// Column information from query results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub ordinal_position: i32,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal_position: usize) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            ordinal_position: ordinal_position as i32,
        }
    }
}

/// Cell value in a result set
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric view of the cell. Numeric text counts, since raw queries and
    /// CSV files hand back decimals as text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            CellValue::String(s) => parse_decimal(s.trim()),
            _ => None,
        }
    }

    /// Text view of the cell, used for grouping keys and names
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(b) => Some(b.to_string()),
            CellValue::Int(i) => Some(i.to_string()),
            CellValue::Float(f) => Some(f.to_string()),
            CellValue::String(s) | CellValue::DateTime(s) => Some(s.clone()),
        }
    }
}

/// How a result set was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Typed whole-view read
    Structured,
    /// `SELECT *` with textual values and inferred column types
    RawQuery,
    /// Read back from an exported CSV file
    CsvFile,
    /// Stand-in for a view that failed to load
    Derived,
}

/// Query result containing columns and rows
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub source: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub strategy: LoadStrategy,
}

impl QueryResult {
    pub fn new(source: impl Into<String>, strategy: LoadStrategy) -> Self {
        Self {
            source: source.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: 0,
            strategy,
        }
    }

    /// The stand-in for a view that could not be loaded
    pub fn empty(source: impl Into<String>) -> Self {
        Self::new(source, LoadStrategy::Derived)
    }

    pub fn with_data(mut self, columns: Vec<ColumnInfo>, rows: Vec<Vec<CellValue>>) -> Self {
        self.row_count = rows.len();
        self.columns = columns;
        self.rows = rows;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Position of a column by exact name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Connection trait - all database connections must implement this
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection ID
    fn connection_id(&self) -> &str;

    /// Allow downcasting for driver-specific operations
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Database driver trait - all database drivers must implement this
#[async_trait::async_trait]
pub trait DatabaseDriver: Send + Sync {
    // --- Metadata ---
    /// Get the database type this driver supports
    fn database_type(&self) -> DatabaseType;

    /// Get the display name for this driver
    fn driver_name(&self) -> &'static str {
        self.database_type().display_name()
    }

    // --- Connection Management ---
    /// Create a new connection from configuration
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError>;

    // --- Reads ---
    /// Read every row of a table or view with typed column decoding
    async fn read_table(&self, conn: &dyn Connection, table: &str) -> Result<QueryResult, DatabaseError>;

    /// Execute raw SQL and return its rows with inferred column types
    async fn execute_query(&self, conn: &dyn Connection, sql: &str) -> Result<QueryResult, DatabaseError>;
}

/// Unified database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub id: String,
    pub database_type: DatabaseType,

    // Common connection fields
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Database name, or the file path for SQLite
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Validate pooled connections before handing them out
    pub pre_ping: bool,

    // PostgreSQL specific
    pub postgres_sslmode: Option<String>, // "disable", "prefer", "require"
}

impl DatabaseConfig {
    pub fn new(database_type: DatabaseType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            database_type,
            host: None,
            port: None,
            database: String::new(),
            username: None,
            password: None,
            pre_ping: true,
            postgres_sslmode: None,
        }
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        fn blank(value: &Option<String>) -> bool {
            value.as_deref().map(str::is_empty).unwrap_or(true)
        }

        match self.database_type {
            DatabaseType::Sqlite => {
                if self.database.is_empty() {
                    return Err(DatabaseError::InvalidConfig(
                        "SQLite database path is required".to_string(),
                    ));
                }
            }
            DatabaseType::Postgresql => {
                if blank(&self.host) {
                    return Err(DatabaseError::InvalidConfig("Host is required".to_string()));
                }
                if blank(&self.username) {
                    return Err(DatabaseError::InvalidConfig("Username is required".to_string()));
                }
                if blank(&self.password) {
                    return Err(DatabaseError::InvalidConfig("Password is required".to_string()));
                }
                if self.database.is_empty() {
                    return Err(DatabaseError::InvalidConfig("Database name is required".to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn get_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.database_type.default_port())
    }
}

/// Quote a possibly schema-qualified identifier, e.g. `public.vw_sales`
/// becomes `"public"."vw_sales"`. Embedded quotes are doubled.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}
