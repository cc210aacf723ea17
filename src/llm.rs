use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Decoding parameters sent with every completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 1024,
            temperature: 1.0,
            top_p: 0.95,
        }
    }
}

/// One request to a text-generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_instruction: String,
    pub prompt: String,
    pub generation: GenerationConfig,
}

/// A text-generation service. Returns the raw response text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &CompletionRequest) -> Result<String, ModelError>;
}
