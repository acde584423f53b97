// View Loader
// Loads a whole view: typed structured read first, raw `SELECT *` only if that fails

use crate::db::registry::DriverConnection;
use crate::db::traits::{quote_identifier, Connection, DatabaseDriver, DatabaseError, QueryResult};
use tracing::{info, warn};

/// A view that could not be loaded by either strategy
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to load view '{view}': {source}")]
    Unrecoverable {
        view: String,
        #[source]
        source: DatabaseError,
    },

    #[error("Failed to load view '{view}': structured read failed ({primary}); fallback query failed ({fallback})")]
    BothStrategiesFailed {
        view: String,
        primary: DatabaseError,
        fallback: DatabaseError,
    },
}

impl LoadError {
    pub fn view(&self) -> &str {
        match self {
            LoadError::Unrecoverable { view, .. } | LoadError::BothStrategiesFailed { view, .. } => view,
        }
    }
}

/// Reads views through one driver and one connection
pub struct ViewLoader<'a> {
    driver: &'a dyn DatabaseDriver,
    conn: &'a dyn Connection,
}

impl<'a> ViewLoader<'a> {
    pub fn new(driver: &'a dyn DatabaseDriver, conn: &'a dyn Connection) -> Self {
        Self { driver, conn }
    }

    /// Load every row of `view`. The raw query runs only when the structured
    /// read fails with a recoverable error.
    pub async fn load(&self, view: &str) -> Result<QueryResult, LoadError> {
        info!(view, "Loading view");

        let result = match self.driver.read_table(self.conn, view).await {
            Ok(result) => result,
            Err(primary) if primary.is_recoverable() => {
                warn!(view, error = %primary, "Structured read failed, retrying as raw query");
                let sql = format!("SELECT * FROM {}", quote_identifier(view));
                let mut result = self
                    .driver
                    .execute_query(self.conn, &sql)
                    .await
                    .map_err(|fallback| LoadError::BothStrategiesFailed {
                        view: view.to_string(),
                        primary,
                        fallback,
                    })?;
                result.source = view.to_string();
                result
            }
            Err(source) => {
                return Err(LoadError::Unrecoverable {
                    view: view.to_string(),
                    source,
                })
            }
        };

        info!(
            view,
            rows = result.row_count,
            strategy = ?result.strategy,
            elapsed_ms = result.execution_time_ms,
            "Loaded view"
        );
        Ok(result)
    }
}

impl DriverConnection {
    pub fn loader(&self) -> ViewLoader<'_> {
        ViewLoader::new(self.driver.as_ref(), self.connection.as_ref())
    }
}
