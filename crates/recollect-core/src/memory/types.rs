//! ============================================================================
//! Memory Types - Records, scopes, facts and reconciliation decisions
//! ============================================================================
//! Defines the persisted memory record plus the ephemeral values that flow
//! through one write-path invocation.
//! ============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form metadata attached to a memory
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Current time as Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The (user_id, agent_id) partition a memory or query is restricted to.
///
/// Two scopes match only when both keys are equal, absence included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_id: Option<String>,
}

impl Scope {
    /// Build a scope, treating blank identifiers as absent
    pub fn new(user_id: Option<String>, agent_id: Option<String>) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            user_id: clean(user_id),
            agent_id: clean(agent_id),
        }
    }

    /// The unscoped partition
    pub fn unscoped() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self::new(Some(user_id.into()), None)
    }

    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self::new(None, Some(agent_id.into()))
    }

    pub fn with_agent(self, agent_id: impl Into<String>) -> Self {
        Self::new(self.user_id, Some(agent_id.into()))
    }

    /// Same scope with blank identifiers dropped, for literals built
    /// without `new`
    pub fn normalized(&self) -> Scope {
        Self::new(self.user_id.clone(), self.agent_id.clone())
    }

    pub fn is_unscoped(&self) -> bool {
        self.user_id.is_none() && self.agent_id.is_none()
    }

    pub fn matches(&self, other: &Scope) -> bool {
        self == other
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "user={} agent={}",
            self.user_id.as_deref().unwrap_or("-"),
            self.agent_id.as_deref().unwrap_or("-")
        )
    }
}

/// A persisted memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier, assigned at creation
    pub id: Uuid,
    /// Canonical natural-language statement
    pub text: String,
    /// Embedding of the current text (not always returned by remote stores)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    /// Partition this memory belongs to
    #[serde(default)]
    pub scope: Scope,
    /// Extensible metadata (session ids, sources, ...)
    #[serde(default)]
    pub metadata: Metadata,
    /// Unix millis when the memory was created
    pub created_at: i64,
    /// Unix millis when the text last changed
    pub updated_at: i64,
}

impl MemoryRecord {
    /// Create a new memory with a fresh id and timestamps
    pub fn new(text: String, embedding: Vec<f32>, scope: Scope, metadata: Metadata) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            text,
            embedding,
            scope,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the text and its embedding, keeping identity and creation time
    pub fn revise(&mut self, text: String, embedding: Vec<f32>) {
        self.text = text;
        self.embedding = embedding;
        self.updated_at = now_millis().max(self.updated_at);
    }
}

/// A memory paired with its similarity to a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: MemoryRecord,
    pub score: f32,
}

/// An extracted statement awaiting reconciliation. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFact {
    pub text: String,
    pub scope: Scope,
    pub metadata: Metadata,
}

/// Kind of mutation a reconciliation decision denotes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryEvent {
    Add,
    Update,
    Delete,
    None,
}

impl std::fmt::Display for MemoryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MemoryEvent::Add => "ADD",
            MemoryEvent::Update => "UPDATE",
            MemoryEvent::Delete => "DELETE",
            MemoryEvent::None => "NONE",
        };
        f.write_str(label)
    }
}

/// Outcome of reconciling one candidate fact against its candidate set
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Insert a new memory
    Add { text: String },
    /// Replace the text of an existing memory
    Update { id: Uuid, text: String },
    /// Remove a stale, contradicted memory
    Delete { id: Uuid },
    /// Already known; nothing to do
    None,
}

impl Decision {
    pub fn event(&self) -> MemoryEvent {
        match self {
            Decision::Add { .. } => MemoryEvent::Add,
            Decision::Update { .. } => MemoryEvent::Update,
            Decision::Delete { .. } => MemoryEvent::Delete,
            Decision::None => MemoryEvent::None,
        }
    }

    /// The existing memory this decision targets, if any
    pub fn target(&self) -> Option<Uuid> {
        match self {
            Decision::Update { id, .. } | Decision::Delete { id } => Some(*id),
            Decision::Add { .. } | Decision::None => None,
        }
    }
}

/// A decision after it went through the write applier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDecision {
    /// The candidate fact this decision was made for
    pub fact: String,
    pub event: MemoryEvent,
    /// Memory created, updated or deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<Uuid>,
    /// Text now stored (ADD / UPDATE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Text that was replaced or removed (UPDATE / DELETE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_text: Option<String>,
    /// Why the fact was skipped, when a fact-local failure occurred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl AppliedDecision {
    pub fn none(fact: impl Into<String>) -> Self {
        Self {
            fact: fact.into(),
            event: MemoryEvent::None,
            memory_id: None,
            text: None,
            previous_text: None,
            skipped: None,
        }
    }

    pub fn skipped(fact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::none(fact)
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub backend: String,
    pub collection: String,
    pub memory_count: u64,
}
