pub mod postgres;
pub mod sqlite;

use crate::db::schema::{ColumnSchema, ForeignKeyInfo, Row};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Supported database engines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DatabaseEngine {
    PostgreSql,
    Sqlite,
}

impl std::fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseEngine::PostgreSql => write!(f, "PostgreSQL"),
            DatabaseEngine::Sqlite => write!(f, "SQLite"),
        }
    }
}

/// Connection configuration for a database
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub engine: DatabaseEngine,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connection_string: Option<String>,
    pub file_path: Option<String>,
    pub connection_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::PostgreSql,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            connection_string: None,
            file_path: None,
            connection_timeout_secs: 30,
        }
    }
}

/// Whether a generated statement's transaction is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run without committing; the transaction is rolled back when the connection is released
    ReadOnly,
    /// Commit after the statement succeeds
    Commit,
}

/// The trait every database backend implements.
///
/// Each call acquires its own connection and releases it before returning.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Column definitions for a table, ordered by declaration position
    async fn fetch_columns(&self, table_name: &str) -> anyhow::Result<Vec<ColumnSchema>>;

    /// Foreign-key constraints declared on a table
    async fn fetch_foreign_keys(&self, table_name: &str) -> anyhow::Result<Vec<ForeignKeyInfo>>;

    /// Execute one SQL statement exactly as given and return its result set, if any
    async fn execute(&self, sql: &str, mode: ExecutionMode) -> anyhow::Result<Vec<Row>>;

    /// Get the database engine type
    fn engine(&self) -> DatabaseEngine;
}

/// Create the connector for the configured engine.
pub fn connector_for(config: ConnectionConfig) -> Arc<dyn DatabaseConnector> {
    match config.engine {
        DatabaseEngine::PostgreSql => Arc::new(postgres::PostgresConnector::new(config)),
        DatabaseEngine::Sqlite => Arc::new(sqlite::SqliteConnector::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_for_engine() {
        let pg = connector_for(ConnectionConfig::default());
        assert_eq!(pg.engine(), DatabaseEngine::PostgreSql);

        let lite = connector_for(ConnectionConfig {
            engine: DatabaseEngine::Sqlite,
            file_path: Some("app.db".into()),
            ..Default::default()
        });
        assert_eq!(lite.engine(), DatabaseEngine::Sqlite);
    }

    #[test]
    fn test_engine_display() {
        assert_eq!(DatabaseEngine::PostgreSql.to_string(), "PostgreSQL");
        assert_eq!(DatabaseEngine::Sqlite.to_string(), "SQLite");
    }

    #[test]
    fn test_connection_config_partial_json() {
        let cfg: ConnectionConfig =
            serde_json::from_str(r#"{"engine":"Sqlite","file_path":"shop.db"}"#).unwrap();
        assert_eq!(cfg.engine, DatabaseEngine::Sqlite);
        assert_eq!(cfg.file_path.as_deref(), Some("shop.db"));
        assert_eq!(cfg.connection_timeout_secs, 30);
    }
}
