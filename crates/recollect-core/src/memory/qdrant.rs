//! ============================================================================
//! Qdrant Store - Remote vector database backend
//! ============================================================================
//! Stores memories as points in a cosine collection. Scope keys live as
//! top-level payload fields; an absent key is filtered with `is_empty` so
//! unscoped facts never search scoped partitions.
//! ============================================================================

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, points_selector::PointsSelectorOneOf, Condition,
    CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Direction, Distance, FieldType, Filter, GetPointsBuilder,
    OrderByBuilder, PointId, PointStruct, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{MemoryError, Result};
use super::store::MemoryStore;
use super::types::{now_millis, MemoryRecord, Metadata, Scope, ScoredMemory};

const USER_ID: &str = "user_id";
const AGENT_ID: &str = "agent_id";
const CREATED_AT: &str = "created_at";

/// Memory store backed by Qdrant vector database
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

fn store_err(context: &str, e: impl std::fmt::Display) -> MemoryError {
    MemoryError::StoreUnavailable(format!("{}: {}", context, e))
}

impl QdrantStore {
    /// Connect to Qdrant and make sure the collection exists
    pub async fn connect(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| store_err("Failed to create Qdrant client", e))?;

        let store = Self {
            client,
            collection: collection.to_string(),
            dimension,
        };

        store.ensure_collection().await?;

        Ok(store)
    }

    /// Ensure the memories collection exists
    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| store_err("Failed to check collection existence", e))?;

        if !exists {
            info!("Creating collection: {} (dimension {})", self.collection, self.dimension);

            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| store_err("Failed to create collection", e))?;

            info!("Collection {} created successfully", self.collection);
        } else {
            debug!("Collection {} already exists", self.collection);
        }

        // Ordered scrolls need a range index on the sort key
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    CREATED_AT,
                    FieldType::Integer,
                )
                .wait(true),
            )
            .await
            .map_err(|e| store_err("Failed to index created_at", e))?;

        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(MemoryError::Config(format!(
                "Vector has {} dimensions, collection expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    async fn upsert(&self, record: &MemoryRecord) -> Result<()> {
        let point = PointStruct::new(
            record.id.to_string(),
            record.embedding.clone(),
            build_payload(record)?,
        );

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .map_err(|e| store_err("Failed to upsert memory", e))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for QdrantStore {
    async fn insert(
        &self,
        text: &str,
        vector: Vec<f32>,
        scope: &Scope,
        metadata: Metadata,
    ) -> Result<Uuid> {
        self.check_dimension(&vector)?;

        let record = MemoryRecord::new(text.to_string(), vector, scope.clone(), metadata);
        debug!("Storing memory {} ({})", record.id, scope);

        self.upsert(&record).await?;

        debug!("Memory {} stored successfully", record.id);
        Ok(record.id)
    }

    async fn update(&self, id: Uuid, text: &str, vector: Vec<f32>) -> Result<()> {
        self.check_dimension(&vector)?;

        let mut record = self.get(id).await?.ok_or(MemoryError::NotFound(id))?;
        record.revise(text.to_string(), vector);

        self.upsert(&record).await?;

        debug!("Memory {} updated", id);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        if self.get(id).await?.is_none() {
            return Err(MemoryError::NotFound(id));
        }

        debug!("Deleting memory {}", id);

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(vec![id.to_string()])
                    .wait(true),
            )
            .await
            .map_err(|e| store_err("Failed to delete memory", e))?;

        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        scope: &Scope,
        limit: usize,
    ) -> Result<Vec<ScoredMemory>> {
        self.check_dimension(vector)?;
        if limit == 0 {
            return Ok(vec![]);
        }

        debug!("Searching memories for {} (limit: {})", scope, limit);

        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
                    .filter(scope_filter(scope))
                    .with_payload(true),
            )
            .await
            .map_err(|e| store_err("Failed to search memories", e))?;

        let memories: Vec<ScoredMemory> = search_result
            .result
            .into_iter()
            .filter_map(|point| {
                let id = extract_uuid_from_point_id(point.id?)?;
                let memory = record_from_payload(id, &point.payload)?;
                Some(ScoredMemory {
                    memory,
                    score: point.score,
                })
            })
            .collect();

        debug!("Found {} matching memories", memories.len());
        Ok(memories)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection, vec![PointId::from(id.to_string())])
                    .with_payload(true),
            )
            .await
            .map_err(|e| store_err("Failed to get memory", e))?;

        Ok(response
            .result
            .into_iter()
            .find_map(|point| record_from_payload(id, &point.payload)))
    }

    async fn list(&self, scope: &Scope, limit: usize) -> Result<Vec<MemoryRecord>> {
        debug!("Getting memories for {} (limit: {})", scope, limit);

        let scroll_result = self
            .client
            .scroll(list_request(&self.collection, scope, limit))
            .await
            .map_err(|e| store_err("Failed to scroll memories", e))?;

        let mut memories: Vec<MemoryRecord> = scroll_result
            .result
            .into_iter()
            .filter_map(|point| {
                let id = extract_uuid_from_point_id(point.id?)?;
                record_from_payload(id, &point.payload)
            })
            .collect();
        memories.sort_by_key(|m| (m.created_at, m.id));

        debug!("Retrieved {} memories for {}", memories.len(), scope);
        Ok(memories)
    }

    async fn delete_scope(&self, scope: &Scope) -> Result<u64> {
        info!("Deleting all memories for {}", scope);

        let filter = scope_filter(scope);
        let doomed = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(filter.clone())
                    .exact(true),
            )
            .await
            .map_err(|e| store_err("Failed to count memories", e))?
            .result
            .map(|r| r.count)
            .unwrap_or(0);

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsSelectorOneOf::Filter(filter))
                    .wait(true),
            )
            .await
            .map_err(|e| store_err("Failed to delete memories", e))?;

        info!("Deleted {} memories for {}", doomed, scope);
        Ok(doomed)
    }

    async fn count(&self) -> Result<u64> {
        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| store_err("Failed to get collection info", e))?;

        Ok(info.result.and_then(|r| r.points_count).unwrap_or(0))
    }

    fn backend_name(&self) -> &'static str {
        "qdrant"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.health_check().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Qdrant health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Exact-scope filter: present keys must match, absent keys must be empty
fn scope_filter(scope: &Scope) -> Filter {
    let key_condition = |key: &str, value: &Option<String>| match value {
        Some(v) => Condition::matches(key, v.clone()),
        None => Condition::is_empty(key),
    };

    Filter::must([
        key_condition(USER_ID, &scope.user_id),
        key_condition(AGENT_ID, &scope.agent_id),
    ])
}

/// Scroll the oldest `limit` points of `scope`
fn list_request(collection: &str, scope: &Scope, limit: usize) -> ScrollPointsBuilder {
    ScrollPointsBuilder::new(collection)
        .filter(scope_filter(scope))
        .order_by(OrderByBuilder::new(CREATED_AT).direction(Direction::Asc as i32))
        .limit(limit as u32)
        .with_payload(true)
}

fn build_payload(record: &MemoryRecord) -> Result<HashMap<String, Value>> {
    let metadata_json = serde_json::to_string(&record.metadata)
        .map_err(|e| store_err("Failed to serialize metadata", e))?;

    let mut payload: HashMap<String, Value> = [
        ("text".to_string(), Value::from(record.text.clone())),
        ("metadata_json".to_string(), Value::from(metadata_json)),
        (CREATED_AT.to_string(), Value::from(record.created_at)),
        ("updated_at".to_string(), Value::from(record.updated_at)),
    ]
    .into_iter()
    .collect();

    if let Some(user_id) = &record.scope.user_id {
        payload.insert(USER_ID.to_string(), Value::from(user_id.clone()));
    }
    if let Some(agent_id) = &record.scope.agent_id {
        payload.insert(AGENT_ID.to_string(), Value::from(agent_id.clone()));
    }

    Ok(payload)
}

fn record_from_payload(id: Uuid, payload: &HashMap<String, Value>) -> Option<MemoryRecord> {
    let metadata = get_string(payload, "metadata_json")
        .and_then(|raw| serde_json::from_str::<Metadata>(&raw).ok())
        .unwrap_or_default();
    let created_at = get_i64(payload, CREATED_AT).unwrap_or_else(now_millis);

    Some(MemoryRecord {
        id,
        text: get_string(payload, "text")?,
        embedding: vec![], // Not returned in search results
        scope: Scope {
            user_id: get_string(payload, USER_ID),
            agent_id: get_string(payload, AGENT_ID),
        },
        metadata,
        created_at,
        updated_at: get_i64(payload, "updated_at").unwrap_or(created_at),
    })
}

// Helper to extract UUID from PointId
fn extract_uuid_from_point_id(point_id: PointId) -> Option<Uuid> {
    match point_id.point_id_options? {
        PointIdOptions::Uuid(uuid_str) => Uuid::parse_str(&uuid_str).ok(),
        PointIdOptions::Num(_) => None, // We use UUID strings, not numeric IDs
    }
}

// Helper functions to extract values from payload
fn get_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn get_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    payload.get(key).and_then(|v| v.as_integer())
}
