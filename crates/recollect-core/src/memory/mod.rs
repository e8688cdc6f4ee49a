//! ============================================================================
//! Memory Module - Deduplicating fact memory
//! ============================================================================
//! Turns conversation turns into a consistent store of atomic facts and
//! answers semantic searches over it.
//!
//! ## Features
//! - LLM-driven fact extraction
//! - Per-scope (user / agent) memory isolation
//! - ADD / UPDATE / DELETE / NONE reconciliation against similar memories
//! - Qdrant or embedded redb storage
//!
//! ## Architecture
//! ```text
//! Turn → Extract → Facts
//!                    ↓ (one at a time, in order)
//!        Embed → Scoped kNN → Candidates
//!                                 ↓
//!                      Classify → Decision → Apply → Store
//!
//! Query → Embed → Scoped kNN → Threshold → Results
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use recollect_core::{MemoryConfig, MemoryManager, Scope};
//!
//! let config = MemoryConfig::from_env()?;
//! let manager = MemoryManager::from_config(config, dashscope_key, openai_key).await?;
//!
//! let scope = Scope::user("u1");
//! manager.write("我叫张三，是软件工程师", &scope).await?;
//! let hits = manager.search("张三的职业", &scope, 5, Some(0.3)).await?;
//! ```
//! ============================================================================

mod applier;
mod embeddings;
mod error;
mod extractor;
mod llm;
mod local;
mod manager;
mod prompts;
mod qdrant;
mod reconcile;
mod response;
mod retrieval;
mod search;
mod store;
mod types;

// Re-export public types
pub use applier::WriteApplier;
pub use embeddings::{
    cosine_similarity, create_embedding_service, EmbeddingGateway, EmbeddingService,
};
pub use error::{MemoryError, Result};
pub use extractor::{parse_facts, ExtractionOracle, FactExtractor};
pub use llm::{create_llm_oracle, LlmOracle};
pub use local::LocalStore;
pub use manager::{open_store, MemoryManager};
pub use qdrant::QdrantStore;
pub use reconcile::{parse_verdict, ClassificationOracle, OracleCandidate, Reconciler, Verdict};
pub use retrieval::Retriever;
pub use search::SearchStage;
pub use store::MemoryStore;
pub use types::{
    AppliedDecision, CandidateFact, Decision, MemoryEvent, MemoryRecord, MemoryStats, Metadata,
    Scope, ScoredMemory,
};
