//! ============================================================================
//! LLM Oracle - Chat-completions backend for extraction and classification
//! ============================================================================
//! Talks to any OpenAI-compatible `/chat/completions` endpoint (DashScope
//! compatible mode by default). Returns the raw answer text; parsing and
//! validation belong to the extractor and reconciler.
//! ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::embeddings::OPENAI_BASE_URL;
use super::error::{MemoryError, Result};
use super::extractor::ExtractionOracle;
use super::prompts::{classification_input, FACT_EXTRACTION_PROMPT, MEMORY_CLASSIFICATION_PROMPT};
use super::reconcile::{ClassificationOracle, OracleCandidate};
use crate::config::MemoryConfig;

const MAX_TOKENS: u32 = 2048;

/// Chat-completions client answering both oracle questions
pub struct LlmOracle {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl LlmOracle {
    pub fn new(api_key: String, base_url: String, model: String, temperature: f32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
        }
    }

    pub fn from_config(api_key: String, config: &MemoryConfig) -> Self {
        Self::new(
            api_key,
            config.llm_base_url.clone(),
            config.llm_model.clone(),
            config.llm_temperature,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One system + user exchange; the error is a plain message so each
    /// oracle can wrap it in its own failure kind.
    async fn call_api(&self, system: &str, user: &str) -> std::result::Result<String, String> {
        debug!(model = %self.model, chars = user.len(), "Calling chat completions");

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(self.temperature),
            max_tokens: Some(MAX_TOKENS),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("API error {}: {}", status, body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("failed to parse API response: {}", e))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| "no choices in API response".to_string())
    }
}

#[async_trait]
impl ExtractionOracle for LlmOracle {
    async fn extract(&self, turn: &str) -> Result<String> {
        self.call_api(FACT_EXTRACTION_PROMPT, turn)
            .await
            .map_err(MemoryError::Extraction)
    }
}

#[async_trait]
impl ClassificationOracle for LlmOracle {
    async fn classify(&self, fact: &str, candidates: &[OracleCandidate]) -> Result<String> {
        let input = classification_input(fact, candidates);
        self.call_api(MEMORY_CLASSIFICATION_PROMPT, &input)
            .await
            .map_err(MemoryError::Classification)
    }
}

/// Create the LLM oracle, trying DashScope first, then OpenAI
pub fn create_llm_oracle(
    dashscope_api_key: Option<String>,
    openai_api_key: Option<String>,
    config: &MemoryConfig,
) -> Result<LlmOracle> {
    if let Some(key) = dashscope_api_key.filter(|k| !k.is_empty()) {
        debug!("Using {} ({}) for fact extraction", config.llm_base_url, config.llm_model);
        return Ok(LlmOracle::from_config(key, config));
    }

    if let Some(key) = openai_api_key.filter(|k| !k.is_empty()) {
        warn!("DashScope API key not available, falling back to OpenAI chat completions");
        return Ok(LlmOracle::new(
            key,
            OPENAI_BASE_URL.to_string(),
            config.openai_llm_model().to_string(),
            config.llm_temperature,
        ));
    }

    Err(MemoryError::Config(
        "No LLM API key available (tried DASHSCOPE_API_KEY and OPENAI_API_KEY)".into(),
    ))
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
