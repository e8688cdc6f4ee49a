//! ============================================================================
//! Memory Errors - Failure taxonomy for the write and read paths
//! ============================================================================
//! Fact-local failures are contained by the pipeline (the fact becomes a
//! NONE); everything else aborts the turn and reaches the caller.
//! ============================================================================

use uuid::Uuid;

/// Errors raised by the memory pipeline and its collaborators
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Extraction output malformed: {0}")]
    ExtractionFormat(String),

    #[error("Extraction oracle failed: {0}")]
    Extraction(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Classification oracle failed: {0}")]
    Classification(String),

    #[error("Classification output unparseable: {0}")]
    ClassificationParse(String),

    #[error("Ambiguous reconciliation: {0}")]
    AmbiguousReconciliation(String),

    #[error("Memory store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Memory not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl MemoryError {
    /// Whether this failure only concerns the fact being reconciled.
    ///
    /// Such failures skip that fact and let the rest of the turn proceed.
    /// Shared infrastructure failures (embedding, store, extraction) are
    /// not fact-local and abort the whole turn.
    pub fn is_fact_local(&self) -> bool {
        matches!(
            self,
            MemoryError::Classification(_)
                | MemoryError::ClassificationParse(_)
                | MemoryError::AmbiguousReconciliation(_)
                | MemoryError::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
