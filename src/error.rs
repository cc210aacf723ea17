use thiserror::Error;

/// Failures of the text-generation service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("model timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Failures that stop the pipeline before a statement is executed.
///
/// SQL execution errors are not part of this enum: the executor reports
/// them as text next to the (empty) result rows.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("schema query failed for table {table}: {message}")]
    SchemaQuery { table: String, message: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("config: {message}")]
    Config { message: String },
}

impl ProcessorError {
    pub fn config(message: impl Into<String>) -> Self {
        ProcessorError::Config {
            message: message.into(),
        }
    }
}
