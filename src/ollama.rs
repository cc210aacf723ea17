use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::llm::{CompletionRequest, GenerationConfig, LanguageModel};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2:3b";

// ── Ollama API types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    pub size: u64,
    pub modified_at: String,
}

#[derive(Debug, Deserialize)]
pub struct OllamaTagsResponse {
    pub models: Vec<OllamaModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct OllamaOptions {
    pub num_predict: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl From<&GenerationConfig> for OllamaOptions {
    fn from(cfg: &GenerationConfig) -> Self {
        Self {
            num_predict: cfg.max_output_tokens,
            temperature: cfg.temperature,
            top_p: cfg.top_p,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
pub struct OllamaChatStreamChunk {
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub done: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaStatus {
    pub running: bool,
    pub models: Vec<OllamaModel>,
}

// ── Stream decoding ──────────────────────────────────────────────────

/// Accumulates the content of a streamed `/api/chat` response.
///
/// The body is newline-delimited JSON; a line may be split across chunks.
#[derive(Debug, Default)]
struct ChatStreamDecoder {
    pending: Vec<u8>,
    text: String,
    done: bool,
}

impl ChatStreamDecoder {
    fn push(&mut self, bytes: &[u8]) -> Result<(), ModelError> {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.line(&line)?;
        }
        Ok(())
    }

    fn line(&mut self, raw: &[u8]) -> Result<(), ModelError> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        match serde_json::from_str::<OllamaChatStreamChunk>(line) {
            Ok(chunk) => {
                if let Some(err) = chunk.error {
                    return Err(ModelError::Unavailable(err));
                }
                if let Some(msg) = chunk.message {
                    self.text.push_str(&msg.content);
                }
                if chunk.done {
                    self.done = true;
                }
            }
            Err(e) => log::debug!("Skipping unparsable stream line: {}", e),
        }
        Ok(())
    }

    fn finish(mut self) -> Result<String, ModelError> {
        let rest = std::mem::take(&mut self.pending);
        self.line(&rest)?;
        if !self.done {
            log::warn!("Model stream ended without a done marker");
        }
        if self.text.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(self.text)
    }
}

// ── Client ───────────────────────────────────────────────────────────

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    request_timeout: Duration,
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_MODEL, Duration::from_secs(300))
    }
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, request_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            request_timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn check_status(&self) -> OllamaStatus {
        match self.list_models().await {
            Ok(models) => OllamaStatus {
                running: true,
                models,
            },
            Err(e) => {
                log::debug!("Ollama status probe failed: {:#}", e);
                OllamaStatus {
                    running: false,
                    models: vec![],
                }
            }
        }
    }

    pub async fn list_models(&self) -> anyhow::Result<Vec<OllamaModel>> {
        let resp = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;
        let tags: OllamaTagsResponse = resp.json().await?;
        Ok(tags.models)
    }

    /// Whether the configured model is among `models`. A bare name matches any tag.
    pub fn is_model_listed(&self, models: &[OllamaModel]) -> bool {
        models
            .iter()
            .any(|m| m.name == self.model || m.name.starts_with(&format!("{}:", self.model)))
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout {
                seconds: self.request_timeout.as_secs(),
            }
        } else {
            ModelError::Unavailable(e.to_string())
        }
    }

    /// Stream a chat completion, returning the full response text.
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        generation: &GenerationConfig,
    ) -> Result<String, ModelError> {
        let body = OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            options: generation.into(),
        };

        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::Unavailable(format!(
                "Ollama returned {}: {}",
                status, text
            )));
        }

        let mut decoder = ChatStreamDecoder::default();
        let mut stream = resp.bytes_stream();

        use futures_util::StreamExt;
        while let Some(chunk_result) = stream.next().await {
            let chunk_bytes = chunk_result.map_err(|e| self.map_transport_error(e))?;
            decoder.push(&chunk_bytes)?;
        }

        decoder.finish()
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: request.system_instruction.clone(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            },
        ];
        self.chat_stream(messages, &request.generation).await
    }
}
