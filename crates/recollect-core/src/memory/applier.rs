//! Write applier: turns one decision into exactly one store mutation.

use std::sync::Arc;
use tracing::info;

use super::embeddings::EmbeddingGateway;
use super::error::Result;
use super::store::MemoryStore;
use super::types::{AppliedDecision, CandidateFact, Decision, MemoryEvent, ScoredMemory};

pub struct WriteApplier {
    embeddings: Arc<dyn EmbeddingGateway>,
    store: Arc<dyn MemoryStore>,
}

impl WriteApplier {
    pub fn new(embeddings: Arc<dyn EmbeddingGateway>, store: Arc<dyn MemoryStore>) -> Self {
        Self { embeddings, store }
    }

    /// Apply `decision` for `fact`.
    ///
    /// `candidates` is the set the decision was made against; it supplies
    /// the replaced text for UPDATE and DELETE. A target that vanished in
    /// the meantime surfaces as `NotFound`.
    pub async fn apply(
        &self,
        fact: &CandidateFact,
        decision: &Decision,
        candidates: &[ScoredMemory],
    ) -> Result<AppliedDecision> {
        let previous_text = decision.target().and_then(|id| {
            candidates
                .iter()
                .find(|c| c.memory.id == id)
                .map(|c| c.memory.text.clone())
        });

        match decision {
            Decision::Add { text } => {
                let vector = self.embeddings.embed(text).await?;
                let id = self
                    .store
                    .insert(text, vector, &fact.scope, fact.metadata.clone())
                    .await?;
                info!(memory_id = %id, scope = %fact.scope, text = %text, "Memory added");

                Ok(AppliedDecision {
                    fact: fact.text.clone(),
                    event: MemoryEvent::Add,
                    memory_id: Some(id),
                    text: Some(text.clone()),
                    previous_text: None,
                    skipped: None,
                })
            }
            Decision::Update { id, text } => {
                let vector = self.embeddings.embed(text).await?;
                self.store.update(*id, text, vector).await?;
                info!(
                    memory_id = %id,
                    old = previous_text.as_deref().unwrap_or_default(),
                    new = %text,
                    "Memory updated"
                );

                Ok(AppliedDecision {
                    fact: fact.text.clone(),
                    event: MemoryEvent::Update,
                    memory_id: Some(*id),
                    text: Some(text.clone()),
                    previous_text,
                    skipped: None,
                })
            }
            Decision::Delete { id } => {
                self.store.delete(*id).await?;
                info!(
                    memory_id = %id,
                    text = previous_text.as_deref().unwrap_or_default(),
                    "Memory deleted"
                );

                Ok(AppliedDecision {
                    fact: fact.text.clone(),
                    event: MemoryEvent::Delete,
                    memory_id: Some(*id),
                    text: None,
                    previous_text,
                    skipped: None,
                })
            }
            Decision::None => {
                info!(fact = %fact.text, "No memory change");
                Ok(AppliedDecision::none(fact.text.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::error::MemoryError;
    use crate::memory::local::LocalStore;
    use crate::memory::types::{Metadata, Scope};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LengthEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingGateway for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.chars().count() as f32, 1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<LengthEmbedder>, Arc<LocalStore>, WriteApplier) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path().join("m.redb"), "memories", 3).unwrap());
        let embedder = Arc::new(LengthEmbedder {
            calls: AtomicUsize::new(0),
        });
        let applier = WriteApplier::new(embedder.clone(), store.clone());
        (dir, embedder, store, applier)
    }

    fn fact(text: &str) -> CandidateFact {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), serde_json::json!("chat"));
        CandidateFact {
            text: text.to_string(),
            scope: Scope::user("u1"),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_add_inserts_with_fact_scope() {
        let (_dir, _embedder, store, applier) = setup();
        let fact = fact("Likes tea");

        let applied = applier
            .apply(&fact, &Decision::Add { text: "Likes tea".into() }, &[])
            .await
            .unwrap();

        assert_eq!(applied.event, MemoryEvent::Add);
        let stored = store.get(applied.memory_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.text, "Likes tea");
        assert_eq!(stored.scope, Scope::user("u1"));
        assert_eq!(stored.metadata["source"], "chat");
    }

    #[tokio::test]
    async fn test_update_reports_previous_text() {
        let (_dir, embedder, store, applier) = setup();
        let id = store
            .insert("Likes tea", vec![9.0, 1.0, 0.0], &Scope::user("u1"), Metadata::new())
            .await
            .unwrap();
        let candidates = store
            .search(&[9.0, 1.0, 0.0], &Scope::user("u1"), 5)
            .await
            .unwrap();

        let decision = Decision::Update {
            id,
            text: "Likes green tea".into(),
        };
        let applied = applier
            .apply(&fact("Prefers green tea"), &decision, &candidates)
            .await
            .unwrap();

        assert_eq!(applied.memory_id, Some(id));
        assert_eq!(applied.previous_text.as_deref(), Some("Likes tea"));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.text, "Likes green tea");
        assert_eq!(stored.embedding, vec![15.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_delete_missing_target_is_not_found() {
        let (_dir, _embedder, _store, applier) = setup();
        let ghost = uuid::Uuid::new_v4();

        let result = applier
            .apply(&fact("Eats meat"), &Decision::Delete { id: ghost }, &[])
            .await;

        assert!(matches!(result, Err(MemoryError::NotFound(id)) if id == ghost));
    }

    #[tokio::test]
    async fn test_none_touches_nothing() {
        let (_dir, embedder, store, applier) = setup();

        let applied = applier
            .apply(&fact("Likes tea"), &Decision::None, &[])
            .await
            .unwrap();

        assert_eq!(applied, AppliedDecision::none("Likes tea"));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
