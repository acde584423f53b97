// Pipeline Configuration
// Built once at process entry from environment variables and passed by reference

use crate::db::{DatabaseConfig, DatabaseType};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_DATABASE: &str = "smart_budget";
pub const DEFAULT_SSLMODE: &str = "prefer";
pub const DEFAULT_OUTPUT_DIR: &str = "./outputs";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything one run needs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub output_dir: PathBuf,
}

impl PipelineConfig {
    /// Read the process environment. Call after any `.env` file is loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_type = match get("DB_TYPE") {
            Some(value) => DatabaseType::parse(&value).ok_or_else(|| ConfigError::Invalid {
                var: "DB_TYPE",
                value,
                reason: "expected postgresql or sqlite".to_string(),
            })?,
            None => DatabaseType::Postgresql,
        };

        let pre_ping = match get("DB_PRE_PING") {
            Some(value) => parse_bool(&value).ok_or_else(|| ConfigError::Invalid {
                var: "DB_PRE_PING",
                value,
                reason: "expected true or false".to_string(),
            })?,
            None => true,
        };

        let mut database = DatabaseConfig::new(database_type);
        database.pre_ping = pre_ping;

        match database_type {
            DatabaseType::Postgresql => {
                database.host = Some(get("PG_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()));
                database.port = Some(match get("PG_PORT") {
                    Some(value) => value.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                        var: "PG_PORT",
                        value,
                        reason: e.to_string(),
                    })?,
                    None => database_type.default_port(),
                });
                database.database = get("PG_DB").unwrap_or_else(|| DEFAULT_DATABASE.to_string());
                database.username = Some(get("PG_USER").ok_or(ConfigError::Missing("PG_USER"))?);
                database.password = Some(get("PG_PASS").ok_or(ConfigError::Missing("PG_PASS"))?);
                database.postgres_sslmode = Some(get("PG_SSLMODE").unwrap_or_else(|| DEFAULT_SSLMODE.to_string()));
            }
            DatabaseType::Sqlite => {
                database.database = get("SQLITE_PATH").ok_or(ConfigError::Missing("SQLITE_PATH"))?;
            }
        }

        let output_dir = PathBuf::from(get("OUTPUT_DIR").unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()));

        Ok(Self { database, output_dir })
    }

    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_postgres_defaults() {
        let config = config(&[("PG_USER", "etl"), ("PG_PASS", "secret")]).unwrap();
        let db = &config.database;

        assert_eq!(db.database_type, DatabaseType::Postgresql);
        assert_eq!(db.host.as_deref(), Some("localhost"));
        assert_eq!(db.get_port(), 5432);
        assert_eq!(db.database, "smart_budget");
        assert_eq!(db.postgres_sslmode.as_deref(), Some("prefer"));
        assert!(db.pre_ping);
        assert_eq!(config.output_dir, PathBuf::from("./outputs"));
        assert!(db.validate().is_ok());
    }

    #[test]
    fn test_credentials_are_required() {
        let err = config(&[("PG_PASS", "secret")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PG_USER")));

        let err = config(&[("PG_USER", "etl"), ("PG_PASS", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PG_PASS")));
    }

    #[test]
    fn test_invalid_values() {
        let err = config(&[("PG_USER", "u"), ("PG_PASS", "p"), ("PG_PORT", "54x")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PG_PORT", .. }));

        let err = config(&[("DB_TYPE", "oracle")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DB_TYPE", .. }));

        let err = config(&[("PG_USER", "u"), ("PG_PASS", "p"), ("DB_PRE_PING", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DB_PRE_PING", .. }));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PG_HOST", "db.internal"),
            ("PG_PORT", "6543"),
            ("PG_DB", "budget"),
            ("PG_USER", "u"),
            ("PG_PASS", "p"),
            ("PG_SSLMODE", "disable"),
            ("DB_PRE_PING", "false"),
            ("OUTPUT_DIR", "/tmp/out"),
        ])
        .unwrap()
        .with_output_dir("/srv/exports");

        assert_eq!(config.database.host.as_deref(), Some("db.internal"));
        assert_eq!(config.database.get_port(), 6543);
        assert_eq!(config.database.database, "budget");
        assert_eq!(config.database.postgres_sslmode.as_deref(), Some("disable"));
        assert!(!config.database.pre_ping);
        assert_eq!(config.output_dir, PathBuf::from("/srv/exports"));
    }

    #[test]
    fn test_sqlite() {
        let config = config(&[("DB_TYPE", "sqlite"), ("SQLITE_PATH", "/data/sales.db")]).unwrap();
        assert_eq!(config.database.database_type, DatabaseType::Sqlite);
        assert_eq!(config.database.database, "/data/sales.db");
        assert!(config.database.username.is_none());

        let err = self::config(&[("DB_TYPE", "sqlite")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SQLITE_PATH")));
    }
}
