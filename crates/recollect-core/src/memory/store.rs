//! ============================================================================
//! Memory Store - Persistence and scope-filtered nearest-neighbor search
//! ============================================================================
//! Backends must make mutations of a single id linearizable; the pipeline
//! itself holds no locks.
//! ============================================================================

use async_trait::async_trait;
use uuid::Uuid;

use super::error::Result;
use super::types::{MemoryRecord, Metadata, Scope, ScoredMemory};

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a new record and return its freshly assigned id
    async fn insert(
        &self,
        text: &str,
        vector: Vec<f32>,
        scope: &Scope,
        metadata: Metadata,
    ) -> Result<Uuid>;

    /// Replace text and vector in place, keeping id and creation time.
    /// Fails with `NotFound` when the id no longer exists.
    async fn update(&self, id: Uuid, text: &str, vector: Vec<f32>) -> Result<()>;

    /// Remove a record. Fails with `NotFound` when the id no longer exists.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Up to `limit` records in exactly `scope`, most similar first
    async fn search(&self, vector: &[f32], scope: &Scope, limit: usize)
        -> Result<Vec<ScoredMemory>>;

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>>;

    /// Records in exactly `scope`, oldest first
    async fn list(&self, scope: &Scope, limit: usize) -> Result<Vec<MemoryRecord>>;

    /// Remove every record in exactly `scope`, returning how many went
    async fn delete_scope(&self, scope: &Scope) -> Result<u64>;

    /// Total records across all scopes
    async fn count(&self) -> Result<u64>;

    /// Short backend label for stats output
    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> Result<bool> {
        self.count().await.map(|_| true)
    }
}
