//! ============================================================================
//! Memory Configuration - Explicit settings handed to every stage
//! ============================================================================
//! Defaults target DashScope's OpenAI-compatible endpoints and an embedded
//! redb store under ~/.recollect. `MemoryConfig::from_env()` overlays
//! RECOLLECT_* variables (and QDRANT_URL) on top of the defaults.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::memory::MemoryError;

/// OpenAI-compatible endpoint used for both chat and embeddings by default
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-v3";
pub const DEFAULT_LLM_MODEL: &str = "qwen-turbo";

/// Models substituted for the DashScope defaults on the OpenAI fallback
pub const OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const OPENAI_LLM_MODEL: &str = "gpt-4o-mini";

/// Where memories are persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    /// Embedded redb file
    Local { path: PathBuf },
    /// Remote Qdrant instance
    Qdrant { url: String },
}

impl StoreBackend {
    /// ~/.recollect/memories.redb, or ./recollect.redb without a home dir
    pub fn default_local() -> Self {
        let path = dirs::home_dir()
            .map(|home| home.join(".recollect").join("memories.redb"))
            .unwrap_or_else(|| PathBuf::from("recollect.redb"));
        StoreBackend::Local { path }
    }
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::default_local()
    }
}

/// Configuration for the memory pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Collection (Qdrant) or table (redb) name
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Candidates retrieved per fact during reconciliation (K)
    #[serde(default = "default_retrieval_limit")]
    pub retrieval_limit: usize,

    /// Default result cap for searches
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Default similarity cutoff for searches
    #[serde(default)]
    pub search_threshold: Option<f32>,

    /// Most facts one turn may yield; a longer list rejects the turn
    #[serde(default = "default_max_facts_per_turn")]
    pub max_facts_per_turn: usize,

    /// Embedding model name
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embedding dimension, must match the store
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    #[serde(default = "default_base_url")]
    pub embedding_base_url: String,

    /// Chat model used for extraction and classification
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_base_url")]
    pub llm_base_url: String,

    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,

    #[serde(default)]
    pub backend: StoreBackend,
}

fn default_collection_name() -> String {
    "memories".into()
}

fn default_retrieval_limit() -> usize {
    5
}

fn default_search_limit() -> usize {
    5
}

fn default_max_facts_per_turn() -> usize {
    20
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.into()
}

fn default_embedding_dim() -> usize {
    1024
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.into()
}

fn default_llm_temperature() -> f32 {
    0.3 // JSON answers need low temperature
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            collection_name: default_collection_name(),
            retrieval_limit: default_retrieval_limit(),
            search_limit: default_search_limit(),
            search_threshold: None,
            max_facts_per_turn: default_max_facts_per_turn(),
            embedding_model: default_embedding_model(),
            embedding_dim: default_embedding_dim(),
            embedding_base_url: default_base_url(),
            llm_model: default_llm_model(),
            llm_base_url: default_base_url(),
            llm_temperature: default_llm_temperature(),
            backend: StoreBackend::default(),
        }
    }
}

impl MemoryConfig {
    /// Defaults overlaid with process environment variables
    pub fn from_env() -> Result<Self, MemoryError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// QDRANT_URL selects the Qdrant backend; otherwise RECOLLECT_DB_PATH
    /// moves the embedded store.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MemoryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("RECOLLECT_COLLECTION") {
            config.collection_name = v;
        }
        if let Some(v) = get("RECOLLECT_RETRIEVAL_LIMIT") {
            config.retrieval_limit = parse_var("RECOLLECT_RETRIEVAL_LIMIT", &v)?;
        }
        if let Some(v) = get("RECOLLECT_SEARCH_LIMIT") {
            config.search_limit = parse_var("RECOLLECT_SEARCH_LIMIT", &v)?;
        }
        if let Some(v) = get("RECOLLECT_SEARCH_THRESHOLD") {
            config.search_threshold = Some(parse_var("RECOLLECT_SEARCH_THRESHOLD", &v)?);
        }
        if let Some(v) = get("RECOLLECT_MAX_FACTS") {
            config.max_facts_per_turn = parse_var("RECOLLECT_MAX_FACTS", &v)?;
        }
        if let Some(v) = get("RECOLLECT_EMBEDDING_MODEL") {
            config.embedding_model = v;
        }
        if let Some(v) = get("RECOLLECT_EMBEDDING_DIM") {
            config.embedding_dim = parse_var("RECOLLECT_EMBEDDING_DIM", &v)?;
        }
        if let Some(v) = get("RECOLLECT_EMBEDDING_BASE_URL") {
            config.embedding_base_url = v;
        }
        if let Some(v) = get("RECOLLECT_LLM_MODEL") {
            config.llm_model = v;
        }
        if let Some(v) = get("RECOLLECT_LLM_BASE_URL") {
            config.llm_base_url = v;
        }
        if let Some(v) = get("RECOLLECT_LLM_TEMPERATURE") {
            config.llm_temperature = parse_var("RECOLLECT_LLM_TEMPERATURE", &v)?;
        }

        if let Some(url) = get("QDRANT_URL") {
            config.backend = StoreBackend::Qdrant { url };
        } else if let Some(path) = get("RECOLLECT_DB_PATH") {
            config.backend = StoreBackend::Local {
                path: PathBuf::from(path),
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Embedding model for the OpenAI endpoint: the configured one, unless
    /// it is still the DashScope default
    pub fn openai_embedding_model(&self) -> &str {
        if self.embedding_model == DEFAULT_EMBEDDING_MODEL {
            OPENAI_EMBEDDING_MODEL
        } else {
            &self.embedding_model
        }
    }

    /// Chat model for the OpenAI endpoint, same rule as embeddings
    pub fn openai_llm_model(&self) -> &str {
        if self.llm_model == DEFAULT_LLM_MODEL {
            OPENAI_LLM_MODEL
        } else {
            &self.llm_model
        }
    }

    /// Reject settings no stage can work with
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.collection_name.trim().is_empty() {
            return Err(MemoryError::Config("collection_name must not be empty".into()));
        }
        if self.retrieval_limit == 0 {
            return Err(MemoryError::Config("retrieval_limit must be at least 1".into()));
        }
        if self.search_limit == 0 {
            return Err(MemoryError::Config("search_limit must be at least 1".into()));
        }
        if self.max_facts_per_turn == 0 {
            return Err(MemoryError::Config("max_facts_per_turn must be at least 1".into()));
        }
        if self.embedding_dim == 0 {
            return Err(MemoryError::Config("embedding_dim must be at least 1".into()));
        }
        if let Some(threshold) = self.search_threshold {
            if !(-1.0..=1.0).contains(&threshold) {
                return Err(MemoryError::Config(format!(
                    "search_threshold {} is outside [-1, 1]",
                    threshold
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, MemoryError> {
    value
        .trim()
        .parse()
        .map_err(|_| MemoryError::Config(format!("{} has invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.retrieval_limit, 5);
        assert_eq!(config.collection_name, "memories");
        assert!(config.search_threshold.is_none());
        assert!(matches!(config.backend, StoreBackend::Local { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overlay() {
        let config = MemoryConfig::from_lookup(lookup_from(&[
            ("RECOLLECT_RETRIEVAL_LIMIT", "8"),
            ("RECOLLECT_SEARCH_THRESHOLD", "0.3"),
            ("RECOLLECT_EMBEDDING_DIM", "512"),
            ("QDRANT_URL", "http://localhost:6334"),
        ]))
        .unwrap();

        assert_eq!(config.retrieval_limit, 8);
        assert_eq!(config.search_threshold, Some(0.3));
        assert_eq!(config.embedding_dim, 512);
        assert_eq!(
            config.backend,
            StoreBackend::Qdrant {
                url: "http://localhost:6334".into()
            }
        );
    }

    #[test]
    fn test_openai_models_replace_dashscope_defaults_only() {
        let config = MemoryConfig::default();
        assert_eq!(config.openai_embedding_model(), OPENAI_EMBEDDING_MODEL);
        assert_eq!(config.openai_llm_model(), OPENAI_LLM_MODEL);

        let config = MemoryConfig::from_lookup(lookup_from(&[
            ("RECOLLECT_EMBEDDING_MODEL", "text-embedding-3-large"),
            ("RECOLLECT_LLM_MODEL", "gpt-4o"),
        ]))
        .unwrap();
        assert_eq!(config.openai_embedding_model(), "text-embedding-3-large");
        assert_eq!(config.openai_llm_model(), "gpt-4o");
    }

    #[test]
    fn test_db_path_overlay() {
        let config =
            MemoryConfig::from_lookup(lookup_from(&[("RECOLLECT_DB_PATH", "/tmp/m.redb")])).unwrap();
        assert_eq!(
            config.backend,
            StoreBackend::Local {
                path: PathBuf::from("/tmp/m.redb")
            }
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = MemoryConfig::from_lookup(lookup_from(&[("RECOLLECT_RETRIEVAL_LIMIT", "many")]))
            .unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));

        let err = MemoryConfig::from_lookup(lookup_from(&[("RECOLLECT_RETRIEVAL_LIMIT", "0")]))
            .unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));

        let err = MemoryConfig::from_lookup(lookup_from(&[("RECOLLECT_SEARCH_THRESHOLD", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: MemoryConfig = serde_json::from_str(
            r#"{"retrieval_limit": 3, "backend": {"kind": "qdrant", "url": "http://q:6334"}}"#,
        )
        .unwrap();
        assert_eq!(config.retrieval_limit, 3);
        assert_eq!(config.search_limit, 5);
        assert_eq!(config.llm_model, "qwen-turbo");
    }
}
