// Database Drivers
// Contains implementations for each supported database type

pub mod postgres;
pub mod sqlite;

// Re-export drivers
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
