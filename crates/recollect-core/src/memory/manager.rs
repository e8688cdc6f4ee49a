//! ============================================================================
//! Memory Manager - Orchestrates the write and read paths
//! ============================================================================
//! High-level API for turning conversation turns into memories and
//! searching them. Facts from one turn are processed strictly in order, so
//! a later fact always sees the mutations of the earlier ones.
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::applier::WriteApplier;
use super::embeddings::{create_embedding_service, EmbeddingGateway};
use super::error::{MemoryError, Result};
use super::extractor::{ExtractionOracle, FactExtractor};
use super::llm::create_llm_oracle;
use super::local::LocalStore;
use super::qdrant::QdrantStore;
use super::reconcile::{ClassificationOracle, Reconciler};
use super::retrieval::Retriever;
use super::search::SearchStage;
use super::store::MemoryStore;
use super::types::{
    AppliedDecision, CandidateFact, Decision, MemoryRecord, MemoryStats, Metadata, Scope,
    ScoredMemory,
};
use crate::config::{MemoryConfig, StoreBackend};

/// Memory manager wiring extraction, retrieval, reconciliation and storage
pub struct MemoryManager {
    config: MemoryConfig,
    store: Arc<dyn MemoryStore>,
    extractor: FactExtractor,
    retriever: Retriever,
    reconciler: Reconciler,
    applier: WriteApplier,
    searcher: SearchStage,
}

impl MemoryManager {
    /// Assemble a manager from explicit collaborators
    pub fn new(
        config: MemoryConfig,
        embeddings: Arc<dyn EmbeddingGateway>,
        store: Arc<dyn MemoryStore>,
        extraction: Arc<dyn ExtractionOracle>,
        classification: Arc<dyn ClassificationOracle>,
    ) -> Result<Self> {
        config.validate()?;
        if embeddings.dimension() != config.embedding_dim {
            return Err(MemoryError::Config(format!(
                "embedding gateway produces {} dimensions, configuration says {}",
                embeddings.dimension(),
                config.embedding_dim
            )));
        }

        Ok(Self {
            extractor: FactExtractor::new(extraction, &config),
            retriever: Retriever::new(embeddings.clone(), store.clone(), &config),
            reconciler: Reconciler::new(classification),
            applier: WriteApplier::new(embeddings.clone(), store.clone()),
            searcher: SearchStage::new(embeddings, store.clone()),
            store,
            config,
        })
    }

    /// Build the HTTP-backed oracles and the configured store
    pub async fn from_config(
        config: MemoryConfig,
        dashscope_api_key: Option<String>,
        openai_api_key: Option<String>,
    ) -> Result<Self> {
        let embeddings =
            create_embedding_service(dashscope_api_key.clone(), openai_api_key.clone(), &config)?;
        let oracle = Arc::new(create_llm_oracle(dashscope_api_key, openai_api_key, &config)?);
        let store = open_store(&config).await?;

        Self::new(
            config,
            Arc::new(embeddings),
            store,
            oracle.clone(),
            oracle,
        )
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Process one conversation turn
    pub async fn write(&self, turn: &str, scope: &Scope) -> Result<Vec<AppliedDecision>> {
        self.write_with_metadata(turn, scope, Metadata::new()).await
    }

    /// Process one conversation turn, attaching `metadata` to any memory it adds.
    ///
    /// Returns one entry per decision, in fact order. Extraction, embedding
    /// and store failures abort the turn; earlier facts stay applied.
    pub async fn write_with_metadata(
        &self,
        turn: &str,
        scope: &Scope,
        metadata: Metadata,
    ) -> Result<Vec<AppliedDecision>> {
        let scope = &scope.normalized();
        let facts = self.extractor.extract(turn, scope, &metadata).await?;
        if facts.is_empty() {
            debug!(scope = %scope, "No facts in turn");
            return Ok(vec![]);
        }
        info!(scope = %scope, facts = facts.len(), "Extracted facts");

        let mut applied = Vec::with_capacity(facts.len());
        for fact in &facts {
            applied.extend(self.process_fact(fact).await?);
        }

        let changed = applied
            .iter()
            .filter(|a| a.skipped.is_none() && a.memory_id.is_some())
            .count();
        info!(scope = %scope, decisions = applied.len(), changed, "Turn processed");
        Ok(applied)
    }

    /// Retrieve, decide and apply for one fact.
    ///
    /// A DELETE is followed by a fresh decision against the remaining
    /// candidates, so a contradiction can be replaced by the new fact.
    async fn process_fact(&self, fact: &CandidateFact) -> Result<Vec<AppliedDecision>> {
        let candidates = self.retriever.retrieve(fact).await?;

        let decision = match contain(fact, self.reconciler.decide(fact, &candidates).await)? {
            Ok(decision) => decision,
            Err(skipped) => return Ok(vec![skipped]),
        };
        let applied = match contain(fact, self.applier.apply(fact, &decision, &candidates).await)? {
            Ok(applied) => applied,
            Err(skipped) => return Ok(vec![skipped]),
        };

        let Decision::Delete { id } = decision else {
            return Ok(vec![applied]);
        };

        let remaining: Vec<ScoredMemory> = candidates
            .into_iter()
            .filter(|c| c.memory.id != id)
            .collect();
        let mut outcome = vec![applied];

        let follow_up = match contain(
            fact,
            self.reconciler.decide_after_delete(fact, &remaining).await,
        )? {
            Ok(decision) => decision,
            Err(skipped) => {
                outcome.push(skipped);
                return Ok(outcome);
            }
        };
        if follow_up != Decision::None {
            match contain(fact, self.applier.apply(fact, &follow_up, &remaining).await)? {
                Ok(applied) | Err(applied) => outcome.push(applied),
            }
        }

        Ok(outcome)
    }

    /// Search memories in `scope` by semantic similarity
    pub async fn search(
        &self,
        query: &str,
        scope: &Scope,
        limit: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredMemory>> {
        self.searcher
            .search(query, &scope.normalized(), limit, threshold)
            .await
    }

    /// Search with the configured limit and threshold
    pub async fn search_default(&self, query: &str, scope: &Scope) -> Result<Vec<ScoredMemory>> {
        self.search(
            query,
            scope,
            self.config.search_limit,
            self.config.search_threshold,
        )
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        self.store.get(id).await
    }

    /// Memories in `scope`, oldest first (non-semantic)
    pub async fn list(&self, scope: &Scope, limit: usize) -> Result<Vec<MemoryRecord>> {
        self.store.list(&scope.normalized(), limit).await
    }

    /// Delete one memory by id
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete(id).await?;
        info!(memory_id = %id, "Memory deleted on request");
        Ok(())
    }

    /// Delete every memory in exactly `scope`
    pub async fn forget(&self, scope: &Scope) -> Result<u64> {
        let scope = &scope.normalized();
        let removed = self.store.delete_scope(scope).await?;
        info!(scope = %scope, removed, "Forgot scope");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            backend: self.store.backend_name().to_string(),
            collection: self.config.collection_name.clone(),
            memory_count: self.store.count().await?,
        })
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.store.health_check().await
    }
}

/// Split a stage result into success, a contained fact-local skip, or an
/// error that must abort the turn
fn contain<T>(
    fact: &CandidateFact,
    result: Result<T>,
) -> Result<std::result::Result<T, AppliedDecision>> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(e) if e.is_fact_local() => {
            warn!(fact = %fact.text, error = %e, "Skipping fact");
            Ok(Err(AppliedDecision::skipped(fact.text.clone(), e.to_string())))
        }
        Err(e) => Err(e),
    }
}

/// Open the store selected by `config.backend`
pub async fn open_store(config: &MemoryConfig) -> Result<Arc<dyn MemoryStore>> {
    match &config.backend {
        StoreBackend::Local { path } => {
            let store = LocalStore::open(path, &config.collection_name, config.embedding_dim)?;
            Ok(Arc::new(store))
        }
        StoreBackend::Qdrant { url } => {
            let store =
                QdrantStore::connect(url, &config.collection_name, config.embedding_dim).await?;
            Ok(Arc::new(store))
        }
    }
}
