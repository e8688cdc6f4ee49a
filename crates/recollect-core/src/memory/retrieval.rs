//! Retrieval of existing memories that may conflict with a candidate fact.

use std::sync::Arc;
use tracing::debug;

use super::embeddings::EmbeddingGateway;
use super::error::Result;
use super::store::MemoryStore;
use super::types::{CandidateFact, ScoredMemory};
use crate::config::MemoryConfig;

/// Finds the K nearest memories in a fact's own scope
pub struct Retriever {
    embeddings: Arc<dyn EmbeddingGateway>,
    store: Arc<dyn MemoryStore>,
    limit: usize,
}

impl Retriever {
    pub fn new(
        embeddings: Arc<dyn EmbeddingGateway>,
        store: Arc<dyn MemoryStore>,
        config: &MemoryConfig,
    ) -> Self {
        Self {
            embeddings,
            store,
            limit: config.retrieval_limit,
        }
    }

    /// Candidate set for `fact`, best match first. Empty is a valid answer.
    pub async fn retrieve(&self, fact: &CandidateFact) -> Result<Vec<ScoredMemory>> {
        let vector = self.embeddings.embed(&fact.text).await?;
        let mut candidates = self.store.search(&vector, &fact.scope, self.limit).await?;

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(self.limit);

        debug!(
            fact = %fact.text,
            scope = %fact.scope,
            candidates = candidates.len(),
            "Retrieved related memories"
        );
        Ok(candidates)
    }
}
