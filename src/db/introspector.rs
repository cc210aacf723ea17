use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::db::connectors::DatabaseConnector;
use crate::db::schema::{ColumnSchema, ForeignKeyRef};
use crate::error::ProcessorError;

pub type TableSchema = Arc<Vec<ColumnSchema>>;

/// Reads table structure from the database catalog and keeps it for the
/// lifetime of the instance.
///
/// Entries are never invalidated, so schema changes made after the first
/// lookup of a table are not observed. Two callers missing on the same
/// table may both query the catalog; whichever stores last wins, and both
/// computed the same value.
pub struct SchemaIntrospector {
    connector: Arc<dyn DatabaseConnector>,
    cache: RwLock<HashMap<String, TableSchema>>,
}

impl SchemaIntrospector {
    pub fn new(connector: Arc<dyn DatabaseConnector>) -> Self {
        Self {
            connector,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Columns of `table_name` in declaration order, with foreign-key targets merged in.
    pub async fn get_table_schema(&self, table_name: &str) -> Result<TableSchema, ProcessorError> {
        if let Some(cached) = self.cached(table_name) {
            return Ok(cached);
        }

        log::debug!("Schema cache miss for table {}", table_name);
        let schema_err = |e: anyhow::Error| ProcessorError::SchemaQuery {
            table: table_name.to_string(),
            message: format!("{:#}", e),
        };

        let mut columns = self
            .connector
            .fetch_columns(table_name)
            .await
            .map_err(schema_err)?;
        let foreign_keys = self
            .connector
            .fetch_foreign_keys(table_name)
            .await
            .map_err(schema_err)?;

        if columns.is_empty() {
            log::warn!("Catalog returned no columns for table {}", table_name);
        }

        for fk in foreign_keys {
            for col in columns.iter_mut().filter(|c| c.name == fk.column_name) {
                col.foreign_key = Some(ForeignKeyRef {
                    references_table: fk.references_table.clone(),
                    references_column: fk.references_column.clone(),
                });
            }
        }

        let schema: TableSchema = Arc::new(columns);
        match self.cache.write() {
            Ok(mut cache) => {
                cache.insert(table_name.to_string(), schema.clone());
            }
            Err(e) => log::warn!("Schema cache lock poisoned, not caching {}: {}", table_name, e),
        }
        Ok(schema)
    }

    fn cached(&self, table_name: &str) -> Option<TableSchema> {
        self.cache.read().ok()?.get(table_name).cloned()
    }

    /// Number of tables currently cached
    pub fn cached_tables(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::connectors::{DatabaseEngine, ExecutionMode};
    use crate::db::schema::{ForeignKeyInfo, Row};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory catalog that counts how often it is queried.
    #[derive(Default)]
    pub(crate) struct FakeCatalog {
        pub tables: Mutex<HashMap<String, Vec<ColumnSchema>>>,
        pub foreign_keys: Mutex<HashMap<String, Vec<ForeignKeyInfo>>>,
        pub column_queries: AtomicUsize,
        pub fk_queries: AtomicUsize,
        pub fail: bool,
    }

    impl FakeCatalog {
        pub fn with_table(self, name: &str, columns: &[(&str, &str)]) -> Self {
            self.tables.lock().unwrap().insert(
                name.to_string(),
                columns
                    .iter()
                    .map(|(n, t)| ColumnSchema::new(*n, *t))
                    .collect(),
            );
            self
        }

        pub fn with_fk(self, table: &str, column: &str, target: &str, target_col: &str) -> Self {
            self.foreign_keys
                .lock()
                .unwrap()
                .entry(table.to_string())
                .or_default()
                .push(ForeignKeyInfo {
                    column_name: column.to_string(),
                    references_table: target.to_string(),
                    references_column: target_col.to_string(),
                });
            self
        }
    }

    #[async_trait]
    impl DatabaseConnector for FakeCatalog {
        async fn fetch_columns(&self, table_name: &str) -> anyhow::Result<Vec<ColumnSchema>> {
            self.column_queries.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("permission denied for schema public");
            }
            Ok(self
                .tables
                .lock()
                .unwrap()
                .get(table_name)
                .cloned()
                .unwrap_or_default())
        }

        async fn fetch_foreign_keys(
            &self,
            table_name: &str,
        ) -> anyhow::Result<Vec<ForeignKeyInfo>> {
            self.fk_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .foreign_keys
                .lock()
                .unwrap()
                .get(table_name)
                .cloned()
                .unwrap_or_default())
        }

        async fn execute(&self, _sql: &str, _mode: ExecutionMode) -> anyhow::Result<Vec<Row>> {
            Ok(vec![])
        }

        fn engine(&self) -> DatabaseEngine {
            DatabaseEngine::PostgreSql
        }
    }

    #[tokio::test]
    async fn test_foreign_keys_merged_by_column_name() {
        let catalog = FakeCatalog::default()
            .with_table("invoice", &[("id", "integer"), ("customer_id", "integer")])
            .with_fk("invoice", "customer_id", "customers", "id");
        let introspector = SchemaIntrospector::new(Arc::new(catalog));

        let schema = introspector.get_table_schema("invoice").await.unwrap();
        assert!(schema[0].foreign_key.is_none());
        assert_eq!(
            schema[1].foreign_key,
            Some(ForeignKeyRef {
                references_table: "customers".into(),
                references_column: "id".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_cache_hit_skips_catalog() {
        let catalog = Arc::new(FakeCatalog::default().with_table("users", &[("id", "integer")]));
        let introspector = SchemaIntrospector::new(catalog.clone());

        let first = introspector.get_table_schema("users").await.unwrap();

        // Catalog changes after the first lookup are not observed
        catalog
            .tables
            .lock()
            .unwrap()
            .insert("users".into(), vec![ColumnSchema::new("renamed", "text")]);

        for _ in 0..3 {
            let again = introspector.get_table_schema("users").await.unwrap();
            assert_eq!(again, first);
        }
        assert_eq!(catalog.column_queries.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.fk_queries.load(Ordering::SeqCst), 1);
        assert_eq!(introspector.cached_tables(), 1);
    }

    #[tokio::test]
    async fn test_unknown_table_caches_empty_schema() {
        let catalog = Arc::new(FakeCatalog::default());
        let introspector = SchemaIntrospector::new(catalog.clone());

        assert!(introspector.get_table_schema("ghost").await.unwrap().is_empty());
        assert!(introspector.get_table_schema("ghost").await.unwrap().is_empty());
        assert_eq!(catalog.column_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_catalog_failure_is_schema_query_error() {
        let catalog = Arc::new(FakeCatalog {
            fail: true,
            ..Default::default()
        });
        let introspector = SchemaIntrospector::new(catalog);

        let err = introspector.get_table_schema("users").await.unwrap_err();
        match err {
            ProcessorError::SchemaQuery { table, message } => {
                assert_eq!(table, "users");
                assert!(message.contains("permission denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(introspector.cached_tables(), 0);
    }
}
