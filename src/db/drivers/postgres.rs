// PostgreSQL Driver
// Implements DatabaseDriver for PostgreSQL using tokio-postgres behind a one-connection bb8 pool

use crate::db::infer::infer_rows;
use crate::db::traits::{
    quote_identifier, CellValue, ColumnInfo, Connection, DatabaseConfig, DatabaseDriver, DatabaseError,
    DatabaseType, LoadStrategy, QueryResult,
};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::{pin_mut, TryStreamExt};
use std::error::Error as StdError;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{NoTls, Row, SimpleQueryMessage};
use tracing::debug;

pub type PostgresPool = Pool<PostgresConnectionManager<NoTls>>;

/// PostgreSQL specific connection wrapper
pub struct PostgresConnection {
    pub id: String,
    pub pool: PostgresPool,
}

#[async_trait::async_trait]
impl Connection for PostgresConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Column types the structured read knows how to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Date,
    Timestamp,
    TimestampTz,
}

impl PgKind {
    fn of(ty: &Type) -> Option<Self> {
        let known = [
            (Type::BOOL, PgKind::Bool),
            (Type::INT2, PgKind::Int2),
            (Type::INT4, PgKind::Int4),
            (Type::INT8, PgKind::Int8),
            (Type::FLOAT4, PgKind::Float4),
            (Type::FLOAT8, PgKind::Float8),
            (Type::NUMERIC, PgKind::Numeric),
            (Type::TEXT, PgKind::Text),
            (Type::VARCHAR, PgKind::Text),
            (Type::BPCHAR, PgKind::Text),
            (Type::NAME, PgKind::Text),
            (Type::DATE, PgKind::Date),
            (Type::TIMESTAMP, PgKind::Timestamp),
            (Type::TIMESTAMPTZ, PgKind::TimestampTz),
        ];
        known.iter().find(|(t, _)| t == ty).map(|(_, kind)| *kind)
    }
}

/// NUMERIC decoded from the binary wire format into a float
#[derive(Debug, Clone, Copy, PartialEq)]
struct PgNumeric(f64);

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        decode_numeric(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Binary NUMERIC: ndigits, weight, sign, dscale (all 16-bit), then base-10000 digits.
/// The digits are rebuilt as decimal text so the float is correctly rounded.
fn decode_numeric(raw: &[u8]) -> Result<f64, Box<dyn StdError + Sync + Send>> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let read = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);

    let ndigits = read(0) as usize;
    let weight = read(2) as i16 as i32;
    let sign = read(4);

    match sign {
        NUMERIC_NAN => return Ok(f64::NAN),
        NUMERIC_PINF => return Ok(f64::INFINITY),
        NUMERIC_NINF => return Ok(f64::NEG_INFINITY),
        _ => {}
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("numeric digits truncated".into());
    }
    if ndigits == 0 {
        return Ok(0.0);
    }

    let mut text = String::with_capacity(ndigits * 4 + 8);
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    for i in 0..ndigits {
        text.push_str(&format!("{:04}", read(8 + i * 2)));
    }
    let exponent = 4 * (weight - ndigits as i32 + 1);
    text.push_str(&format!("e{}", exponent));

    Ok(text.parse::<f64>()?)
}

/// PostgreSQL driver implementation
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver
    pub fn new() -> Self {
        Self
    }

    /// Build PostgreSQL connection string from config
    fn build_connection_string(config: &DatabaseConfig) -> Result<String, DatabaseError> {
        let host = config
            .host
            .as_ref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Host is required".to_string()))?;
        let port = config.get_port();
        if config.database.is_empty() {
            return Err(DatabaseError::InvalidConfig("Database name is required".to_string()));
        }
        let username = config
            .username
            .as_ref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Username is required".to_string()))?;
        let password = config
            .password
            .as_ref()
            .ok_or_else(|| DatabaseError::InvalidConfig("Password is required".to_string()))?;
        let sslmode = config.postgres_sslmode.as_deref().unwrap_or("prefer");

        let conn_string = format!(
            "host={} port={} dbname={} user={} password={} sslmode={}",
            quote_conn_value(host),
            port,
            quote_conn_value(&config.database),
            quote_conn_value(username),
            quote_conn_value(password),
            quote_conn_value(sslmode)
        );

        Ok(conn_string)
    }

    fn downcast(conn: &dyn Connection) -> Result<&PostgresConnection, DatabaseError> {
        conn.as_any()
            .downcast_ref::<PostgresConnection>()
            .ok_or(DatabaseError::InvalidConnection)
    }

    fn decode_cell(row: &Row, idx: usize, column: &ColumnInfo, kind: PgKind) -> Result<CellValue, DatabaseError> {
        fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>, tokio_postgres::Error> {
            row.try_get::<_, Option<T>>(idx)
        }

        let decoded = match kind {
            PgKind::Bool => get::<bool>(row, idx).map(|v| v.map(CellValue::Bool)),
            PgKind::Int2 => get::<i16>(row, idx).map(|v| v.map(|n| CellValue::Int(n as i64))),
            PgKind::Int4 => get::<i32>(row, idx).map(|v| v.map(|n| CellValue::Int(n as i64))),
            PgKind::Int8 => get::<i64>(row, idx).map(|v| v.map(CellValue::Int)),
            PgKind::Float4 => get::<f32>(row, idx).map(|v| v.map(|n| CellValue::Float(n as f64))),
            PgKind::Float8 => get::<f64>(row, idx).map(|v| v.map(CellValue::Float)),
            PgKind::Numeric => get::<PgNumeric>(row, idx).map(|v| v.map(|n| CellValue::Float(n.0))),
            PgKind::Text => get::<String>(row, idx).map(|v| v.map(CellValue::String)),
            PgKind::Date => get::<NaiveDate>(row, idx).map(|v| v.map(|d| CellValue::DateTime(d.to_string()))),
            PgKind::Timestamp => {
                get::<NaiveDateTime>(row, idx).map(|v| v.map(|dt| CellValue::DateTime(dt.to_string())))
            }
            PgKind::TimestampTz => {
                get::<DateTime<Utc>>(row, idx).map(|v| v.map(|dt| CellValue::DateTime(dt.to_rfc3339())))
            }
        };

        decoded
            .map(|v| v.unwrap_or(CellValue::Null))
            .map_err(|e| DatabaseError::DecodeError {
                column: column.name.clone(),
                message: e.to_string(),
            })
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Quote a libpq key/value when it contains spaces, quotes or backslashes
fn quote_conn_value(value: &str) -> String {
    if !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == '\'' || c == '\\') {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// Lost connections are fatal for the run; everything else is a query problem
fn query_error(err: tokio_postgres::Error) -> DatabaseError {
    if err.is_closed() {
        DatabaseError::ConnectionFailed(err.to_string())
    } else {
        DatabaseError::QueryError(err.to_string())
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn Connection>, DatabaseError> {
        let conn_string = Self::build_connection_string(config)?;
        let manager = PostgresConnectionManager::new_from_stringlike(conn_string, NoTls)
            .map_err(|e| DatabaseError::InvalidConfig(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(1)
            .test_on_check_out(config.pre_ping)
            .build(manager)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        // Establish the connection now so a bad host or password fails the run here
        {
            let _client = pool
                .get()
                .await
                .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        }

        Ok(Box::new(PostgresConnection {
            id: config.id.clone(),
            pool,
        }))
    }

    async fn read_table(&self, conn: &dyn Connection, table: &str) -> Result<QueryResult, DatabaseError> {
        let postgres_conn = Self::downcast(conn)?;
        let client = postgres_conn
            .pool
            .get()
            .await
            .map_err(|e| DatabaseError::PoolError(e.to_string()))?;

        let start = std::time::Instant::now();
        let sql = format!("SELECT * FROM {}", quote_identifier(table));
        let statement = client.prepare(&sql).await.map_err(query_error)?;

        let mut columns = Vec::with_capacity(statement.columns().len());
        let mut kinds = Vec::with_capacity(statement.columns().len());
        for (idx, column) in statement.columns().iter().enumerate() {
            let kind = PgKind::of(column.type_()).ok_or_else(|| DatabaseError::UnsupportedType {
                column: column.name().to_string(),
                data_type: column.type_().name().to_string(),
            })?;
            columns.push(ColumnInfo::new(column.name(), column.type_().name(), idx));
            kinds.push(kind);
        }

        let stream = client
            .query_raw(&statement, std::iter::empty::<i32>())
            .await
            .map_err(query_error)?;
        pin_mut!(stream);

        let mut rows = Vec::new();
        while let Some(row) = stream.try_next().await.map_err(query_error)? {
            let cells = columns
                .iter()
                .zip(&kinds)
                .enumerate()
                .map(|(idx, (column, kind))| Self::decode_cell(&row, idx, column, *kind))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(cells);
        }

        debug!(%sql, rows = rows.len(), "structured read finished");
        let mut result = QueryResult::new(table, LoadStrategy::Structured).with_data(columns, rows);
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn execute_query(&self, conn: &dyn Connection, sql: &str) -> Result<QueryResult, DatabaseError> {
        let postgres_conn = Self::downcast(conn)?;
        let client = postgres_conn
            .pool
            .get()
            .await
            .map_err(|e| DatabaseError::PoolError(e.to_string()))?;

        let start = std::time::Instant::now();
        let messages = client.simple_query(sql).await.map_err(query_error)?;

        let mut names: Vec<String> = Vec::new();
        let mut raw_rows: Vec<Vec<Option<String>>> = Vec::new();
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(description) => {
                    names = description.iter().map(|c| c.name().to_string()).collect();
                }
                SimpleQueryMessage::Row(row) => {
                    if names.is_empty() {
                        names = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    raw_rows.push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
                }
                _ => {}
            }
        }

        let (columns, rows) = infer_rows(&names, &raw_rows);
        let mut result = QueryResult::new(sql, LoadStrategy::RawQuery).with_data(columns, rows);
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_bytes(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    fn test_config() -> DatabaseConfig {
        let mut config = DatabaseConfig::new(DatabaseType::Postgresql);
        config.host = Some("localhost".to_string());
        config.port = Some(5432);
        config.database = "smart_budget".to_string();
        config.username = Some("etl_user".to_string());
        config.password = Some("testpass".to_string());
        config
    }

    #[test]
    fn test_driver_type() {
        let driver = PostgresDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Postgresql);
    }

    #[test]
    fn test_connection_string_building() {
        let conn_string = PostgresDriver::build_connection_string(&test_config()).unwrap();

        assert!(conn_string.contains("host=localhost"));
        assert!(conn_string.contains("port=5432"));
        assert!(conn_string.contains("dbname=smart_budget"));
        assert!(conn_string.contains("user=etl_user"));
        assert!(conn_string.contains("password=testpass"));
        assert!(conn_string.contains("sslmode=prefer"));
    }

    #[test]
    fn test_connection_string_quotes_awkward_password() {
        let mut config = test_config();
        config.password = Some("it's a secret".to_string());

        let conn_string = PostgresDriver::build_connection_string(&config).unwrap();
        assert!(conn_string.contains(r"password='it\'s a secret'"));
    }

    #[test]
    fn test_connection_string_requires_password() {
        let mut config = test_config();
        config.password = None;
        assert!(matches!(
            PostgresDriver::build_connection_string(&config),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_decode_numeric() {
        // 1200.50
        let raw = numeric_bytes(0, 0, 2, &[1200, 5000]);
        assert_eq!(decode_numeric(&raw).unwrap(), 1200.5);

        // -0.05
        let raw = numeric_bytes(-1, NUMERIC_NEG, 2, &[500]);
        assert_eq!(decode_numeric(&raw).unwrap(), -0.05);

        // 1000000 = 100 * 10000^1
        let raw = numeric_bytes(1, 0, 0, &[100]);
        assert_eq!(decode_numeric(&raw).unwrap(), 1_000_000.0);

        // zero has no digits
        let raw = numeric_bytes(0, 0, 0, &[]);
        assert_eq!(decode_numeric(&raw).unwrap(), 0.0);

        let raw = numeric_bytes(0, NUMERIC_NAN, 0, &[]);
        assert!(decode_numeric(&raw).unwrap().is_nan());
    }

    #[test]
    fn test_decode_numeric_rejects_truncated_input() {
        assert!(decode_numeric(&[0, 1, 0]).is_err());
        let mut raw = numeric_bytes(0, 0, 0, &[1, 2]);
        raw.truncate(10);
        assert!(decode_numeric(&raw).is_err());
    }

    #[test]
    fn test_supported_kinds() {
        assert_eq!(PgKind::of(&Type::NUMERIC), Some(PgKind::Numeric));
        assert_eq!(PgKind::of(&Type::VARCHAR), Some(PgKind::Text));
        assert_eq!(PgKind::of(&Type::JSONB), None);
        assert_eq!(PgKind::of(&Type::MONEY), None);
    }
}
