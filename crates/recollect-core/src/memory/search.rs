//! Read path: scope-filtered semantic search over stored memories.

use std::sync::Arc;
use tracing::debug;

use super::embeddings::EmbeddingGateway;
use super::error::Result;
use super::store::MemoryStore;
use super::types::{Scope, ScoredMemory};

pub struct SearchStage {
    embeddings: Arc<dyn EmbeddingGateway>,
    store: Arc<dyn MemoryStore>,
}

impl SearchStage {
    pub fn new(embeddings: Arc<dyn EmbeddingGateway>, store: Arc<dyn MemoryStore>) -> Self {
        Self { embeddings, store }
    }

    /// Up to `limit` memories in `scope` ranked by similarity to `query`,
    /// dropping any scoring below `threshold`. Never mutates the store.
    pub async fn search(
        &self,
        query: &str,
        scope: &Scope,
        limit: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredMemory>> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(vec![]);
        }

        let vector = self.embeddings.embed(query).await?;
        let mut results = self.store.search(&vector, scope, limit).await?;

        if let Some(threshold) = threshold {
            results.retain(|r| r.score >= threshold);
        }
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);

        debug!(query = %query, scope = %scope, results = results.len(), "Searched memories");
        Ok(results)
    }
}
