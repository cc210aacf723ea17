use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::db::connectors::ConnectionConfig;
use crate::error::ProcessorError;
use crate::llm::GenerationConfig;
use crate::nl2sql::context::TableDescription;
use crate::nl2sql::prompt::SYSTEM_PROMPT;
use crate::ollama::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: ConnectionConfig,
    /// Tables exposed to the model, in the order they appear in the context
    pub tables: Vec<TableDescription>,
    #[serde(default)]
    pub model: ModelConfig,
}

/// Text-generation service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub system_instruction: String,
    pub generation: GenerationConfig,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_instruction: SYSTEM_PROMPT.to_string(),
            generation: GenerationConfig::default(),
            request_timeout_secs: 300,
        }
    }
}

impl AppConfig {
    /// Load from a JSON file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ProcessorError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProcessorError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&text)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        log::debug!(
            "Loaded config from {} ({} tables, {} database)",
            path.display(),
            config.tables.len(),
            config.database.engine
        );
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ProcessorError> {
        let config: AppConfig = serde_json::from_str(text)
            .map_err(|e| ProcessorError::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Override secrets and endpoints from the environment.
    ///
    /// `NL2SQL_DB_PASSWORD`, `NL2SQL_DB_HOST`, `NL2SQL_OLLAMA_URL`, `NL2SQL_MODEL`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NL2SQL_DB_PASSWORD") {
            self.database.password = Some(v);
        }
        if let Some(v) = lookup("NL2SQL_DB_HOST") {
            self.database.host = Some(v);
        }
        if let Some(v) = lookup("NL2SQL_OLLAMA_URL") {
            self.model.base_url = v;
        }
        if let Some(v) = lookup("NL2SQL_MODEL") {
            self.model.model = v;
        }
    }

    fn validate(&self) -> Result<(), ProcessorError> {
        for (i, table) in self.tables.iter().enumerate() {
            if table.name.trim().is_empty() {
                return Err(ProcessorError::config(format!("table #{} has an empty name", i + 1)));
            }
            if self.tables[..i].iter().any(|t| t.name == table.name) {
                return Err(ProcessorError::config(format!(
                    "table {} is configured more than once",
                    table.name
                )));
            }
        }
        let g = &self.model.generation;
        if !(0.0..=1.0).contains(&g.top_p) {
            return Err(ProcessorError::config("generation.top_p must be within 0..=1"));
        }
        if g.max_output_tokens == 0 {
            return Err(ProcessorError::config("generation.max_output_tokens must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connectors::DatabaseEngine;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"{
        "database": { "engine": "PostgreSql", "host": "127.0.0.1", "port": 5432, "database": "shop", "username": "anpenma" },
        "tables": [
            { "name": "customers", "description": "Contains the information about customers" },
            { "name": "invoice", "description": "Stores invoice details of all orders for a given customer" },
            { "name": "stock", "description": "Contains all details of each unique product being sold." }
        ]
    }"#;

    #[test]
    fn test_defaults_fill_model_section() {
        let cfg = AppConfig::from_json(SAMPLE).unwrap();
        assert_eq!(cfg.database.engine, DatabaseEngine::PostgreSql);
        assert_eq!(cfg.database.connection_timeout_secs, 30);
        assert_eq!(cfg.model, ModelConfig::default());
        assert_eq!(cfg.model.generation.max_output_tokens, 1024);
        assert_eq!(cfg.model.generation.top_p, 0.95);
        let names: Vec<_> = cfg.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["customers", "invoice", "stock"]);
    }

    #[test]
    fn test_partial_model_section() {
        let text = SAMPLE.replace(
            "\"tables\"",
            "\"model\": { \"model\": \"tinyllama\", \"generation\": { \"temperature\": 0.2 } }, \"tables\"",
        );
        let cfg = AppConfig::from_json(&text).unwrap();
        assert_eq!(cfg.model.model, "tinyllama");
        assert_eq!(cfg.model.generation.temperature, 0.2);
        assert_eq!(cfg.model.generation.top_p, 0.95);
        assert_eq!(cfg.model.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = AppConfig::from_json(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            ("NL2SQL_DB_PASSWORD", "s3cret"),
            ("NL2SQL_OLLAMA_URL", "http://gpu-box:11434"),
        ]
        .into_iter()
        .collect();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.database.password.as_deref(), Some("s3cret"));
        assert_eq!(cfg.database.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cfg.model.base_url, "http://gpu-box:11434");
        assert_eq!(cfg.model.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_duplicate_tables_rejected() {
        let text = SAMPLE.replace("\"stock\"", "\"customers\"");
        let err = AppConfig::from_json(&text).unwrap_err();
        assert!(err.to_string().contains("customers is configured more than once"));
    }

    #[test]
    fn test_invalid_generation_rejected() {
        let text = SAMPLE.replace(
            "\"tables\"",
            "\"model\": { \"generation\": { \"top_p\": 1.5 } }, \"tables\"",
        );
        assert!(AppConfig::from_json(&text).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/nl2sql.json")).unwrap_err();
        assert!(matches!(err, ProcessorError::Config { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nl2sql.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.tables.len(), 3);
    }
}
