pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod nl2sql;
pub mod ollama;
pub mod render;

pub use config::{AppConfig, ModelConfig};
pub use error::{ModelError, ProcessorError};
pub use nl2sql::parser::OperationKind;
pub use nl2sql::response::{QueryResponse, Status};
pub use nl2sql::NlToSqlProcessor;
