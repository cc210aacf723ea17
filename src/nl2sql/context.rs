use serde::{Deserialize, Serialize};

use crate::db::introspector::{SchemaIntrospector, TableSchema};
use crate::error::ProcessorError;

/// A configured table and its human-written description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub description: String,
}

/// Table descriptions in configuration order. Names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMetadata {
    tables: Vec<TableDescription>,
}

impl TableMetadata {
    pub fn new(tables: Vec<TableDescription>) -> Result<Self, ProcessorError> {
        for (i, table) in tables.iter().enumerate() {
            if tables[..i].iter().any(|t| t.name == table.name) {
                return Err(ProcessorError::config(format!(
                    "table {} is configured more than once",
                    table.name
                )));
            }
        }
        Ok(Self { tables })
    }

    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ProcessorError> {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, description)| TableDescription {
                    name: name.to_string(),
                    description: description.to_string(),
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableDescription> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Render the context block for every configured table, introspecting as needed.
pub async fn build_context(
    tables: &TableMetadata,
    introspector: &SchemaIntrospector,
) -> Result<String, ProcessorError> {
    let mut described = Vec::with_capacity(tables.len());
    for table in tables.iter() {
        let schema = introspector.get_table_schema(&table.name).await?;
        described.push((table, schema));
    }
    Ok(render_context(&described))
}

/// Render already-introspected tables. Output depends only on the input.
pub fn render_context(tables: &[(&TableDescription, TableSchema)]) -> String {
    let mut context = String::from("Database Schema Information:\n\n");

    for (table, schema) in tables {
        context.push_str(&format!(
            "Table: {}\nDescription: {}\nColumns:\n",
            table.name, table.description
        ));
        for col in schema.iter() {
            context.push_str(&format!("- {} ({})", col.name, col.data_type));
            if let Some(ref fk) = col.foreign_key {
                context.push_str(&format!(
                    " [FK -> {}.{}]",
                    fk.references_table, fk.references_column
                ));
            }
            context.push_str(&format!(": {}\n", col.description));
        }
        context.push('\n');
    }

    context.push_str("\nRelationships:\n");
    for (table, schema) in tables {
        for col in schema.iter() {
            if let Some(ref fk) = col.foreign_key {
                context.push_str(&format!(
                    "- {}.{} relates to {}.{}\n",
                    table.name, col.name, fk.references_table, fk.references_column
                ));
            }
        }
    }

    context
}
