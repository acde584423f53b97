// Database Module
// Drivers, the connection provider, and the view loader

pub mod drivers;
pub mod infer;
pub mod loader;
pub mod registry;
pub mod traits;

pub use drivers::{PostgresDriver, SqliteDriver};
pub use loader::{LoadError, ViewLoader};
pub use registry::{DriverConnection, DriverRegistry};
pub use traits::{
    CellValue, ColumnInfo, Connection, DatabaseConfig, DatabaseDriver, DatabaseError, DatabaseType,
    LoadStrategy, QueryResult,
};
