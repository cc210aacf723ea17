use super::{ConnectionConfig, DatabaseConnector, DatabaseEngine, ExecutionMode};
use crate::db::schema::{ColumnSchema, ForeignKeyInfo, Row, Value, NO_DESCRIPTION};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;

/// SQLite connector using rusqlite
pub struct SqliteConnector {
    config: ConnectionConfig,
}

impl SqliteConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn db_path(&self) -> anyhow::Result<PathBuf> {
        self.config
            .file_path
            .as_ref()
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("SQLite connection requires a file_path"))
    }

    /// Run `f` on a blocking thread with a freshly opened connection.
    async fn with_connection<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let path = self.db_path()?;
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_context(|| format!("Failed to open SQLite database {:?}", path))?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
                .context("Failed to enable foreign keys")?;
            f(&mut conn)
        })
        .await
        .context("spawn_blocking join error")?
    }

    fn value_from_ref(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Int(v),
            ValueRef::Real(v) => Value::Float(v),
            ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
        }
    }
}

/// Primary key column of `table`, used when a foreign key omits its target column.
fn primary_key_column(conn: &Connection, table: &str) -> anyhow::Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) WHERE pk = 1")?;
    let mut rows = stmt.query([table])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl DatabaseConnector for SqliteConnector {
    async fn fetch_columns(&self, table_name: &str) -> anyhow::Result<Vec<ColumnSchema>> {
        let table = table_name.to_string();
        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, type, \"notnull\", dflt_value \
                     FROM pragma_table_info(?1) ORDER BY cid",
                )
                .context("Failed to prepare column query")?;
            let columns = stmt
                .query_map([&table], |row| {
                    let not_null: i64 = row.get(2)?;
                    Ok(ColumnSchema {
                        name: row.get(0)?,
                        data_type: row.get(1)?,
                        description: NO_DESCRIPTION.to_string(),
                        is_nullable: not_null == 0,
                        default_value: row.get(3)?,
                        foreign_key: None,
                    })
                })
                .context("Failed to query column definitions")?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(columns)
        })
        .await
    }

    async fn fetch_foreign_keys(&self, table_name: &str) -> anyhow::Result<Vec<ForeignKeyInfo>> {
        let table = table_name.to_string();
        self.with_connection(move |conn| {
            let raw = {
                let mut stmt = conn
                    .prepare(
                        "SELECT \"from\", \"table\", \"to\" \
                         FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
                    )
                    .context("Failed to prepare foreign key query")?;
                let rows = stmt
                    .query_map([&table], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    })
                    .context("Failed to query foreign keys")?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let mut keys = Vec::with_capacity(raw.len());
            for (column_name, references_table, to) in raw {
                let references_column = match to {
                    Some(col) => col,
                    None => primary_key_column(conn, &references_table)?.unwrap_or_default(),
                };
                keys.push(ForeignKeyInfo {
                    column_name,
                    references_table,
                    references_column,
                });
            }
            Ok(keys)
        })
        .await
    }

    async fn execute(&self, sql: &str, mode: ExecutionMode) -> anyhow::Result<Vec<Row>> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let rows = {
                let mut stmt = tx.prepare(&sql)?;
                let names: Vec<String> = stmt
                    .column_names()
                    .into_iter()
                    .map(String::from)
                    .collect();

                let mut out = Vec::new();
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let mut map = Row::with_capacity(names.len());
                    for (idx, name) in names.iter().enumerate() {
                        map.insert(name.as_str(), Self::value_from_ref(row.get_ref(idx)?));
                    }
                    out.push(map);
                }
                out
            };

            match mode {
                ExecutionMode::Commit => tx.commit()?,
                ExecutionMode::ReadOnly => {
                    if let Err(e) = tx.rollback() {
                        log::warn!("Rollback after read-only statement failed: {}", e);
                    }
                }
            }
            Ok(rows)
        })
        .await
    }

    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Sqlite
    }
}
