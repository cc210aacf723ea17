use std::sync::Arc;

use crate::db::connectors::{DatabaseConnector, ExecutionMode};
use crate::db::schema::Row;
use crate::nl2sql::parser::OperationKind;

/// Rows returned by a generated statement, or the database's error text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs generated SQL against the database.
pub struct QueryExecutor {
    connector: Arc<dyn DatabaseConnector>,
}

impl QueryExecutor {
    pub fn new(connector: Arc<dyn DatabaseConnector>) -> Self {
        Self { connector }
    }

    /// Execute `sql` exactly as given. Mutating operations are committed,
    /// reads never are. Database faults are returned, not raised.
    pub async fn execute(&self, operation: OperationKind, sql: &str) -> ExecutionResult {
        let mode = if operation.is_mutating() {
            ExecutionMode::Commit
        } else {
            ExecutionMode::ReadOnly
        };

        log::debug!("Executing {} statement ({:?}): {}", operation, mode, sql);
        match self.connector.execute(sql, mode).await {
            Ok(rows) => {
                log::debug!("{} statement returned {} row(s)", operation, rows.len());
                ExecutionResult { rows, error: None }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                log::warn!("{} statement failed: {}", operation, message);
                ExecutionResult {
                    rows: vec![],
                    error: Some(message),
                }
            }
        }
    }
}
