// ============================================================================
// LocalStore - Embedded memory store (redb)
// ============================================================================
// Persists memories in a single redb file and answers kNN queries by
// brute-force cosine similarity over the requested scope.
// Default path: ~/.recollect/memories.redb (override via RECOLLECT_DB_PATH)
// ============================================================================

use async_trait::async_trait;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info};
use uuid::Uuid;

use super::embeddings::cosine_similarity;
use super::error::{MemoryError, Result};
use super::store::MemoryStore;
use super::types::{MemoryRecord, Metadata, Scope, ScoredMemory};

/// Embedded store backed by a redb file
pub struct LocalStore {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    db: Database,
    path: PathBuf,
    table: String,
    dimension: usize,
}

/// On-disk record layout. Metadata is kept as JSON text because bincode
/// cannot decode self-describing values.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    id: Uuid,
    text: String,
    embedding: Vec<f32>,
    user_id: Option<String>,
    agent_id: Option<String>,
    metadata_json: String,
    created_at: i64,
    updated_at: i64,
}

impl StoredRecord {
    fn from_record(record: &MemoryRecord) -> Result<Self> {
        Ok(Self {
            id: record.id,
            text: record.text.clone(),
            embedding: record.embedding.clone(),
            user_id: record.scope.user_id.clone(),
            agent_id: record.scope.agent_id.clone(),
            metadata_json: serde_json::to_string(&record.metadata)
                .map_err(|e| store_err("Failed to serialize metadata", e))?,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    fn into_record(self) -> Result<MemoryRecord> {
        let metadata: Metadata = serde_json::from_str(&self.metadata_json)
            .map_err(|e| store_err("Failed to deserialize metadata", e))?;
        Ok(MemoryRecord {
            id: self.id,
            text: self.text,
            embedding: self.embedding,
            scope: Scope {
                user_id: self.user_id,
                agent_id: self.agent_id,
            },
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn in_scope(&self, scope: &Scope) -> bool {
        self.user_id == scope.user_id && self.agent_id == scope.agent_id
    }
}

fn store_err(context: &str, e: impl std::fmt::Display) -> MemoryError {
    MemoryError::StoreUnavailable(format!("{}: {}", context, e))
}

fn encode(record: &StoredRecord) -> Result<Vec<u8>> {
    bincode::serialize(record).map_err(|e| store_err("Failed to serialize memory", e))
}

fn decode(bytes: &[u8]) -> Result<StoredRecord> {
    bincode::deserialize(bytes).map_err(|e| store_err("Failed to deserialize memory", e))
}

impl LocalStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>, table: &str, dimension: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| store_err("Failed to create store directory", e))?;
        }

        info!("Opening memory store at: {}", path.display());

        let db = Database::create(&path).map_err(|e| store_err("Failed to open database", e))?;

        // Ensure the table exists so readers never see TableDoesNotExist
        let write_txn = db
            .begin_write()
            .map_err(|e| store_err("Failed to begin write", e))?;
        {
            let definition = TableDefinition::<&str, &[u8]>::new(table);
            let _ = write_txn
                .open_table(definition)
                .map_err(|e| store_err("Failed to create memories table", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| store_err("Failed to commit init", e))?;

        info!("Memory store ready (table: {}, dimension: {})", table, dimension);

        Ok(Self {
            inner: Arc::new(LocalInner {
                db,
                path,
                table: table.to_string(),
                dimension,
            }),
        })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Run a blocking redb operation off the async executor
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LocalInner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| store_err("Blocking task failed", e))?
    }
}

impl LocalInner {
    fn definition(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.table)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(MemoryError::Config(format!(
                "Vector has {} dimensions, store expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    fn put(&self, record: &StoredRecord) -> Result<()> {
        let key = record.id.to_string();
        let value = encode(record)?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| store_err("Failed to begin write", e))?;
        {
            let mut table = write_txn
                .open_table(self.definition())
                .map_err(|e| store_err("Failed to open memories table", e))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(|e| store_err("Failed to insert memory", e))?;
        }
        write_txn.commit().map_err(|e| store_err("Failed to commit", e))?;
        Ok(())
    }

    /// Read, modify and write one record inside a single write transaction
    fn revise(&self, id: Uuid, text: String, vector: Vec<f32>) -> Result<()> {
        let key = id.to_string();

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| store_err("Failed to begin write", e))?;
        {
            let mut table = write_txn
                .open_table(self.definition())
                .map_err(|e| store_err("Failed to open memories table", e))?;

            let existing = match table
                .get(key.as_str())
                .map_err(|e| store_err("Failed to get memory", e))?
            {
                Some(value) => decode(value.value())?,
                None => return Err(MemoryError::NotFound(id)),
            };

            let mut record = existing.into_record()?;
            record.revise(text, vector);
            let value = encode(&StoredRecord::from_record(&record)?)?;

            table
                .insert(key.as_str(), value.as_slice())
                .map_err(|e| store_err("Failed to update memory", e))?;
        }
        write_txn.commit().map_err(|e| store_err("Failed to commit", e))?;
        Ok(())
    }

    fn remove(&self, id: Uuid) -> Result<()> {
        let key = id.to_string();

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| store_err("Failed to begin write", e))?;
        let removed = {
            let mut table = write_txn
                .open_table(self.definition())
                .map_err(|e| store_err("Failed to open memories table", e))?;
            let guard = table
                .remove(key.as_str())
                .map_err(|e| store_err("Failed to delete memory", e))?;
            guard.is_some()
        };

        if !removed {
            return Err(MemoryError::NotFound(id));
        }
        write_txn.commit().map_err(|e| store_err("Failed to commit", e))?;
        Ok(())
    }

    fn remove_scope(&self, scope: &Scope) -> Result<u64> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| store_err("Failed to begin write", e))?;
        let removed = {
            let mut table = write_txn
                .open_table(self.definition())
                .map_err(|e| store_err("Failed to open memories table", e))?;

            let mut doomed = Vec::new();
            for entry in table
                .iter()
                .map_err(|e| store_err("Failed to iterate memories", e))?
            {
                let (key, value) = entry.map_err(|e| store_err("Failed to read entry", e))?;
                if decode(value.value())?.in_scope(scope) {
                    doomed.push(key.value().to_string());
                }
            }

            for key in &doomed {
                table
                    .remove(key.as_str())
                    .map_err(|e| store_err("Failed to delete memory", e))?;
            }
            doomed.len() as u64
        };
        write_txn.commit().map_err(|e| store_err("Failed to commit", e))?;
        Ok(removed)
    }

    fn fetch(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        let key = id.to_string();

        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| store_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(self.definition())
            .map_err(|e| store_err("Failed to open memories table", e))?;

        match table
            .get(key.as_str())
            .map_err(|e| store_err("Failed to get memory", e))?
        {
            Some(value) => Ok(Some(decode(value.value())?.into_record()?)),
            None => Ok(None),
        }
    }

    /// Every record in `scope`, unordered
    fn scan(&self, scope: &Scope) -> Result<Vec<StoredRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| store_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(self.definition())
            .map_err(|e| store_err("Failed to open memories table", e))?;

        let mut results = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| store_err("Failed to iterate memories", e))?
        {
            let (_key, value) = entry.map_err(|e| store_err("Failed to read entry", e))?;
            let record = decode(value.value())?;
            if record.in_scope(scope) {
                results.push(record);
            }
        }
        Ok(results)
    }

    fn len(&self) -> Result<u64> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| store_err("Failed to begin read", e))?;
        let table = read_txn
            .open_table(self.definition())
            .map_err(|e| store_err("Failed to open memories table", e))?;
        table.len().map_err(|e| store_err("Failed to count memories", e))
    }
}

#[async_trait]
impl MemoryStore for LocalStore {
    async fn insert(
        &self,
        text: &str,
        vector: Vec<f32>,
        scope: &Scope,
        metadata: Metadata,
    ) -> Result<Uuid> {
        self.inner.check_dimension(&vector)?;

        let record = MemoryRecord::new(text.to_string(), vector, scope.clone(), metadata);
        let id = record.id;
        let stored = StoredRecord::from_record(&record)?;

        self.blocking(move |inner| inner.put(&stored)).await?;

        debug!("Stored memory {} ({})", id, scope);
        Ok(id)
    }

    async fn update(&self, id: Uuid, text: &str, vector: Vec<f32>) -> Result<()> {
        self.inner.check_dimension(&vector)?;

        let text = text.to_string();
        self.blocking(move |inner| inner.revise(id, text, vector))
            .await?;

        debug!("Updated memory {}", id);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.blocking(move |inner| inner.remove(id)).await?;

        debug!("Deleted memory {}", id);
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        self.inner.check_dimension(vector)?;
        if limit == 0 {
            return Ok(vec![]);
        }

        let query = vector.to_vec();
        let filter = scope.clone();
        let mut scored = self
            .blocking(move |inner| {
                let records = inner.scan(&filter)?;
                records
                    .into_iter()
                    .map(|stored| {
                        let score = cosine_similarity(&query, &stored.embedding);
                        Ok(ScoredMemory {
                            memory: stored.into_record()?,
                            score,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .await?;

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);

        debug!("Found {} matching memories ({})", scored.len(), scope);
        Ok(scored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        self.blocking(move |inner| inner.fetch(id)).await
    }

    async fn list(&self, scope: &Scope, limit: usize) -> Result<Vec<MemoryRecord>> {
        let filter = scope.clone();
        let mut records = self
            .blocking(move |inner| {
                inner
                    .scan(&filter)?
                    .into_iter()
                    .map(StoredRecord::into_record)
                    .collect::<Result<Vec<_>>>()
            })
            .await?;

        records.sort_by_key(|r| (r.created_at, r.id));
        records.truncate(limit);
        Ok(records)
    }

    async fn delete_scope(&self, scope: &Scope) -> Result<u64> {
        info!("Deleting all memories for {}", scope);

        let filter = scope.clone();
        let removed = self
            .blocking(move |inner| inner.remove_scope(&filter))
            .await?;

        info!("Deleted {} memories for {}", removed, scope);
        Ok(removed)
    }

    async fn count(&self) -> Result<u64> {
        self.blocking(|inner| inner.len()).await
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> LocalStore {
        LocalStore::open(dir.path().join("memories.redb"), "memories", 3).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut metadata = Metadata::new();
        metadata.insert("session_id".into(), serde_json::json!("s1"));

        let id = store
            .insert("Likes tea", vec![1.0, 0.0, 0.0], &Scope::user("u1"), metadata)
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.text, "Likes tea");
        assert_eq!(record.scope, Scope::user("u1"));
        assert_eq!(record.metadata["session_id"], "s1");
        assert_eq!(record.embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_is_scoped_and_ranked() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let u1 = Scope::user("u1");

        let near = store
            .insert("near", vec![1.0, 0.1, 0.0], &u1, Metadata::new())
            .await
            .unwrap();
        let far = store
            .insert("far", vec![0.0, 1.0, 0.0], &u1, Metadata::new())
            .await
            .unwrap();
        store
            .insert("other user", vec![1.0, 0.0, 0.0], &Scope::user("u2"), Metadata::new())
            .await
            .unwrap();
        store
            .insert("unscoped", vec![1.0, 0.0, 0.0], &Scope::unscoped(), Metadata::new())
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0, 0.0], &u1, 10).await.unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|h| h.memory.id).collect();
        assert_eq!(ids, vec![near, far]);
        assert!(hits[0].score > hits[1].score);

        let unscoped = store
            .search(&[1.0, 0.0, 0.0], &Scope::unscoped(), 10)
            .await
            .unwrap();
        assert_eq!(unscoped.len(), 1);
        assert_eq!(unscoped[0].memory.text, "unscoped");

        let capped = store.search(&[1.0, 0.0, 0.0], &u1, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_update_preserves_identity() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let id = store
            .insert("old", vec![1.0, 0.0, 0.0], &Scope::user("u1"), Metadata::new())
            .await
            .unwrap();
        let before = store.get(id).await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.update(id, "new", vec![0.0, 0.0, 1.0]).await.unwrap();

        let after = store.get(id).await.unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.scope, before.scope);
        assert_eq!(after.text, "new");
        assert_eq!(after.embedding, vec![0.0, 0.0, 1.0]);
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let ghost = Uuid::new_v4();

        assert!(matches!(
            store.update(ghost, "x", vec![0.0, 0.0, 1.0]).await,
            Err(MemoryError::NotFound(id)) if id == ghost
        ));
        assert!(matches!(
            store.delete(ghost).await,
            Err(MemoryError::NotFound(id)) if id == ghost
        ));
        assert!(store.get(ghost).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_and_delete_scope() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let u1 = Scope::user("u1");

        let a = store.insert("a", vec![1.0, 0.0, 0.0], &u1, Metadata::new()).await.unwrap();
        store.insert("b", vec![0.0, 1.0, 0.0], &u1, Metadata::new()).await.unwrap();
        store
            .insert("c", vec![0.0, 1.0, 0.0], &Scope::user("u2"), Metadata::new())
            .await
            .unwrap();

        store.delete(a).await.unwrap();
        assert!(store.get(a).await.unwrap().is_none());

        assert_eq!(store.delete_scope(&u1).await.unwrap(), 1);
        assert!(store.list(&u1, 10).await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let result = store
            .insert("bad", vec![1.0, 0.0], &Scope::unscoped(), Metadata::new())
            .await;
        assert!(matches!(result, Err(MemoryError::Config(_))));
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = open_store(&dir);
            store
                .insert("durable", vec![1.0, 0.0, 0.0], &Scope::agent("a1"), Metadata::new())
                .await
                .unwrap()
        };

        let store = open_store(&dir);
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.text, "durable");
        assert_eq!(record.scope, Scope::agent("a1"));
    }
}
