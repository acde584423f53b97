// Driver Registry and Connection Provider
// Maps a database type to its driver and opens the single connection a run uses

use crate::db::drivers::{PostgresDriver, SqliteDriver};
use crate::db::traits::{Connection, DatabaseConfig, DatabaseDriver, DatabaseError, DatabaseType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Registry for managing database drivers
pub struct DriverRegistry {
    drivers: RwLock<HashMap<DatabaseType, Arc<dyn DatabaseDriver>>>,
}

/// A live connection together with the driver that speaks to it
pub struct DriverConnection {
    pub driver: Arc<dyn DatabaseDriver>,
    pub connection: Box<dyn Connection>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the PostgreSQL and SQLite drivers
    pub async fn with_default_drivers() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(PostgresDriver::new())).await;
        registry.register(Arc::new(SqliteDriver::new())).await;
        registry
    }

    /// Register a database driver
    pub async fn register(&self, driver: Arc<dyn DatabaseDriver>) {
        let db_type = driver.database_type();
        let mut drivers = self.drivers.write().await;
        drivers.insert(db_type, driver);
        debug!(?db_type, "registered driver");
    }

    /// Get a driver by database type
    pub async fn get_driver(
        &self,
        db_type: DatabaseType,
    ) -> Result<Arc<dyn DatabaseDriver>, DatabaseError> {
        let drivers = self.drivers.read().await;
        drivers
            .get(&db_type)
            .cloned()
            .ok_or(DatabaseError::DriverNotFound(db_type))
    }

    /// Open one connection for the configured database. Single attempt, no retry.
    pub async fn connect(&self, config: &DatabaseConfig) -> Result<DriverConnection, DatabaseError> {
        config.validate()?;
        let driver = self.get_driver(config.database_type).await?;

        info!(
            driver = driver.driver_name(),
            host = config.host.as_deref().unwrap_or("-"),
            database = %config.database,
            "Connecting to database"
        );
        let connection = driver.connect(config).await?;
        info!(connection_id = connection.connection_id(), "Connection successful");

        Ok(DriverConnection { driver, connection })
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
