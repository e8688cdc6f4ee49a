//! ============================================================================
//! RECOLLECT-CORE: Deduplicating semantic memory
//! ============================================================================
//! This crate turns conversation turns into a consistent store of facts:
//! - Fact extraction from a turn via an LLM oracle
//! - Scope-filtered semantic retrieval of conflicting memories
//! - ADD / UPDATE / DELETE / NONE reconciliation, one fact at a time
//! - Qdrant or embedded redb storage behind a single store trait
//! ============================================================================

pub mod config;
pub mod memory;

// Re-export main types for convenience
pub use config::{MemoryConfig, StoreBackend};
pub use memory::{
    AppliedDecision, MemoryError, MemoryEvent, MemoryManager, MemoryRecord, Metadata, Scope,
    ScoredMemory,
};
