pub mod context;
pub mod parser;
pub mod prompt;
pub mod response;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{AppConfig, ModelConfig};
use crate::db::connectors::{self, DatabaseConnector};
use crate::db::executor::QueryExecutor;
use crate::db::introspector::{SchemaIntrospector, TableSchema};
use crate::error::ProcessorError;
use crate::llm::{CompletionRequest, GenerationConfig, LanguageModel};
use crate::ollama::OllamaClient;

use self::context::TableMetadata;
use self::parser::OperationKind;
use self::response::QueryResponse;

const UNDETERMINED_MESSAGE: &str = "Failed to determine operation type or generate valid query";

/// Stages a request moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    BuildingContext,
    AwaitingModel,
    Parsing,
    Executing,
    Formatting,
    Done,
}

/// Translates natural-language requests into SQL, runs them, and shapes the result.
///
/// One instance is shared by all callers; the only mutable state is the
/// schema cache inside the introspector.
pub struct NlToSqlProcessor {
    tables: TableMetadata,
    introspector: SchemaIntrospector,
    executor: QueryExecutor,
    model: Arc<dyn LanguageModel>,
    system_instruction: String,
    generation: GenerationConfig,
}

impl NlToSqlProcessor {
    pub fn new(
        connector: Arc<dyn DatabaseConnector>,
        tables: TableMetadata,
        model: Arc<dyn LanguageModel>,
        model_config: &ModelConfig,
    ) -> Self {
        Self {
            tables,
            introspector: SchemaIntrospector::new(connector.clone()),
            executor: QueryExecutor::new(connector),
            model,
            system_instruction: model_config.system_instruction.clone(),
            generation: model_config.generation.clone(),
        }
    }

    /// Wire up the configured database connector and the Ollama client.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProcessorError> {
        let tables = TableMetadata::new(config.tables.clone())?;
        let connector = connectors::connector_for(config.database.clone());
        let model = OllamaClient::new(
            &config.model.base_url,
            &config.model.model,
            Duration::from_secs(config.model.request_timeout_secs),
        );
        Ok(Self::new(connector, tables, Arc::new(model), &config.model))
    }

    pub fn tables(&self) -> &TableMetadata {
        &self.tables
    }

    /// Columns of one table, from cache or the catalog.
    pub async fn get_table_schema(&self, table_name: &str) -> Result<TableSchema, ProcessorError> {
        self.introspector.get_table_schema(table_name).await
    }

    /// The schema context block for all configured tables.
    pub async fn build_context(&self) -> Result<String, ProcessorError> {
        context::build_context(&self.tables, &self.introspector).await
    }

    /// Run one natural-language request end to end. Never fails: every
    /// problem is reported inside the returned response.
    pub async fn query_db(&self, nl_query: &str) -> QueryResponse {
        let request_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        log::info!("[{}] Processing request: {}", request_id, nl_query);

        let response = self.run_pipeline(request_id, nl_query).await;

        log::info!(
            "[{}] {} {:?} in {}ms",
            request_id,
            response.operation,
            response.status,
            started.elapsed().as_millis()
        );
        response
    }

    async fn run_pipeline(&self, request_id: uuid::Uuid, nl_query: &str) -> QueryResponse {
        let stage = |s: PipelineStage| log::debug!("[{}] {:?}", request_id, s);

        stage(PipelineStage::BuildingContext);
        let context = match self.build_context().await {
            Ok(c) => c,
            Err(e) => return self.fail(request_id, PipelineStage::BuildingContext, e),
        };

        stage(PipelineStage::AwaitingModel);
        let request = CompletionRequest {
            system_instruction: self.system_instruction.clone(),
            prompt: prompt::build_prompt(&context, nl_query),
            generation: self.generation.clone(),
        };
        let raw = match self.model.generate(&request).await {
            Ok(text) => text,
            Err(e) => return self.fail(request_id, PipelineStage::AwaitingModel, e.into()),
        };

        stage(PipelineStage::Parsing);
        let generated = parser::extract_query(&raw);
        if generated.operation == OperationKind::Unknown || generated.sql.trim().is_empty() {
            log::warn!("[{}] Model output had no usable query", request_id);
            log::debug!("[{}] Raw model output: {}", request_id, raw);
            stage(PipelineStage::Formatting);
            return response::error(
                OperationKind::Unknown,
                Some(generated.sql),
                UNDETERMINED_MESSAGE,
            );
        }

        stage(PipelineStage::Executing);
        let result = self
            .executor
            .execute(generated.operation, &generated.sql)
            .await;

        stage(PipelineStage::Formatting);
        let response = match result.error {
            Some(message) => response::error(generated.operation, Some(generated.sql), message),
            None => response::success(generated.operation, &generated.sql, result.rows),
        };
        stage(PipelineStage::Done);
        response
    }

    fn fail(
        &self,
        request_id: uuid::Uuid,
        at: PipelineStage,
        err: ProcessorError,
    ) -> QueryResponse {
        log::warn!("[{}] Request failed during {:?}: {}", request_id, at, err);
        response::error(OperationKind::Unknown, None, err.to_string())
    }
}
