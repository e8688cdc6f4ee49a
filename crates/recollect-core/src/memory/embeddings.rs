//! ============================================================================
//! Embedding Gateway - Text to fixed-dimension vectors
//! ============================================================================
//! Generates text embeddings through any OpenAI-compatible /embeddings
//! endpoint (DashScope compatible mode by default, OpenAI as fallback).
//! ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{MemoryError, Result};
use crate::config::MemoryConfig;

/// OpenAI API root, used when only an OpenAI key is available
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Turns text into a vector of a fixed, deployment-wide dimension
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Embed one text. The result always has `dimension()` entries.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of every vector this gateway produces
    fn dimension(&self) -> usize;
}

/// Embedding service for generating text vectors over HTTP
pub struct EmbeddingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct EmbeddingUsage {
    prompt_tokens: Option<u32>,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl EmbeddingService {
    /// Create with explicit endpoint, model and dimension
    pub fn new(api_key: String, base_url: String, model: String, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimension,
        }
    }

    /// Create from configuration with the given API key
    pub fn from_config(api_key: String, config: &MemoryConfig) -> Self {
        Self::new(
            api_key,
            config.embedding_base_url.clone(),
            config.embedding_model.clone(),
            config.embedding_dim,
        )
    }

    /// Generate embeddings for multiple texts, in input order
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts,
            dimensions: Some(self.dimension),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(format!("Failed to send request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MemoryError::Embedding(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(MemoryError::Embedding(format!(
                    "API error ({}): {}",
                    status, error.error.message
                )));
            }
            return Err(MemoryError::Embedding(format!("API error ({}): {}", status, body)));
        }

        let embedding_response: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            MemoryError::Embedding(format!("Failed to parse response: {} - body: {}", e, body))
        })?;

        if let Some(usage) = &embedding_response.usage {
            debug!(
                "Embedding tokens used: {} (model: {})",
                usage.total_tokens,
                embedding_response.model.as_deref().unwrap_or(&self.model)
            );
        }

        // Sort by index and extract embeddings
        let mut embeddings: Vec<(usize, Vec<f32>)> = embedding_response
            .data
            .into_iter()
            .map(|d| (d.index, d.embedding))
            .collect();
        embeddings.sort_by_key(|(idx, _)| *idx);

        embeddings
            .into_iter()
            .map(|(_, e)| check_dimension(e, self.dimension))
            .collect()
    }

    /// Get the current model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl EmbeddingGateway for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(vec![text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::Embedding("No embedding returned".into()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Reject vectors that do not match the configured dimension
pub fn check_dimension(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>> {
    if vector.len() != expected {
        return Err(MemoryError::Embedding(format!(
            "Dimension mismatch: expected {}, got {}",
            expected,
            vector.len()
        )));
    }
    Ok(vector)
}

/// Cosine similarity; 0.0 when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Create an embedding service, trying DashScope first, then OpenAI
pub fn create_embedding_service(
    dashscope_api_key: Option<String>,
    openai_api_key: Option<String>,
    config: &MemoryConfig,
) -> Result<EmbeddingService> {
    if let Some(key) = dashscope_api_key.filter(|k| !k.is_empty()) {
        debug!("Using {} for embeddings", config.embedding_base_url);
        return Ok(EmbeddingService::from_config(key, config));
    }

    if let Some(key) = openai_api_key.filter(|k| !k.is_empty()) {
        warn!("DashScope API key not available, falling back to OpenAI for embeddings");
        return Ok(EmbeddingService::new(
            key,
            OPENAI_BASE_URL.to_string(),
            config.openai_embedding_model().to_string(),
            config.embedding_dim,
        ));
    }

    Err(MemoryError::Config(
        "No embedding API key available (tried DASHSCOPE_API_KEY and OPENAI_API_KEY)".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_creation() {
        let config = MemoryConfig::default();
        let service = EmbeddingService::from_config("test-key".to_string(), &config);
        assert_eq!(service.base_url(), crate::config::DEFAULT_BASE_URL);
        assert_eq!(service.model(), "text-embedding-v3");
        assert_eq!(service.dimension(), 1024);
    }

    #[test]
    fn test_openai_fallback() {
        let config = MemoryConfig::default();
        let service =
            create_embedding_service(None, Some("sk-test".to_string()), &config).unwrap();
        assert_eq!(service.base_url(), OPENAI_BASE_URL);
        assert_eq!(service.model(), crate::config::OPENAI_EMBEDDING_MODEL);
        assert_eq!(service.dimension(), 1024);

        assert!(create_embedding_service(Some(String::new()), None, &config).is_err());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let service = EmbeddingService::new(
            "k".into(),
            "http://localhost:8080/v1/".into(),
            "m".into(),
            8,
        );
        assert_eq!(service.base_url(), "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn test_empty_input() {
        let service = EmbeddingService::from_config("test-key".into(), &MemoryConfig::default());
        let result = service.embed_batch(vec![]).await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_dimension_check() {
        assert!(check_dimension(vec![0.0; 4], 4).is_ok());
        assert!(matches!(
            check_dimension(vec![0.0; 3], 4),
            Err(MemoryError::Embedding(_))
        ));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
