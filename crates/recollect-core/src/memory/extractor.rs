//! ============================================================================
//! Fact Extractor - Conversation turn to atomic candidate facts
//! ============================================================================
//! The oracle answers `{"facts": [...]}`. Anything else rejects the whole
//! turn: a partial fact list would silently lose information.
//! ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{MemoryError, Result};
use super::response::json_object;
use super::types::{CandidateFact, Metadata, Scope};
use crate::config::MemoryConfig;

/// External text-understanding service that lists facts in a turn
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Raw oracle answer for one turn
    async fn extract(&self, turn: &str) -> Result<String>;
}

/// Turns a conversation turn into candidate facts
pub struct FactExtractor {
    oracle: Arc<dyn ExtractionOracle>,
    max_facts: usize,
}

impl FactExtractor {
    pub fn new(oracle: Arc<dyn ExtractionOracle>, config: &MemoryConfig) -> Self {
        Self {
            oracle,
            max_facts: config.max_facts_per_turn,
        }
    }

    /// Extract candidate facts carrying the turn's scope and metadata.
    ///
    /// Never touches the store.
    pub async fn extract(
        &self,
        turn: &str,
        scope: &Scope,
        metadata: &Metadata,
    ) -> Result<Vec<CandidateFact>> {
        if turn.trim().is_empty() {
            debug!("Blank turn, nothing to extract");
            return Ok(vec![]);
        }

        let raw = self.oracle.extract(turn).await?;
        let facts = parse_facts(&raw)?;

        if facts.len() > self.max_facts {
            warn!(
                extracted = facts.len(),
                limit = self.max_facts,
                "Too many facts in one turn, rejecting"
            );
            return Err(MemoryError::ExtractionFormat(format!(
                "{} facts in one turn exceeds the limit of {}",
                facts.len(),
                self.max_facts
            )));
        }

        Ok(facts
            .into_iter()
            .map(|text| CandidateFact {
                text,
                scope: scope.clone(),
                metadata: metadata.clone(),
            })
            .collect())
    }
}

/// Parse an extraction answer into trimmed, de-duplicated fact texts
pub fn parse_facts(raw: &str) -> Result<Vec<String>> {
    let object = json_object(raw).ok_or_else(|| {
        MemoryError::ExtractionFormat(format!("no JSON object in answer: {}", preview(raw)))
    })?;

    let items = match object.get("facts") {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(MemoryError::ExtractionFormat(format!(
                "\"facts\" is not an array: {}",
                other
            )))
        }
        None => {
            return Err(MemoryError::ExtractionFormat(
                "answer has no \"facts\" field".into(),
            ))
        }
    };

    let mut seen = HashSet::new();
    let mut facts = Vec::with_capacity(items.len());
    for item in items {
        let text = item.as_str().ok_or_else(|| {
            MemoryError::ExtractionFormat(format!("fact is not a string: {}", item))
        })?;
        let text = text.trim();
        if !text.is_empty() && seen.insert(text.to_string()) {
            facts.push(text.to_string());
        }
    }

    Ok(facts)
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedOracle {
        answer: String,
        calls: AtomicUsize,
    }

    impl CannedOracle {
        fn new(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ExtractionOracle for CannedOracle {
        async fn extract(&self, _turn: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    #[test]
    fn test_parse_facts() {
        let facts = parse_facts(r#"{"facts": [" Likes tea ", "", "Lives in Berlin", "Likes tea"]}"#)
            .unwrap();
        assert_eq!(facts, vec!["Likes tea", "Lives in Berlin"]);
    }

    #[test]
    fn test_parse_empty_facts() {
        assert!(parse_facts(r#"{"facts": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "I could not find any facts",
            r#"{"memories": ["x"]}"#,
            r#"{"facts": "Likes tea"}"#,
            r#"{"facts": ["ok", 42]}"#,
            r#"["Likes tea"]"#,
        ] {
            assert!(
                matches!(parse_facts(raw), Err(MemoryError::ExtractionFormat(_))),
                "accepted {}",
                raw
            );
        }
    }

    #[tokio::test]
    async fn test_extract_attaches_scope() {
        let oracle = CannedOracle::new("```json\n{\"facts\": [\"张三是软件工程师\"]}\n```");
        let extractor = FactExtractor::new(oracle.clone(), &MemoryConfig::default());
        let mut metadata = Metadata::new();
        metadata.insert("session_id".into(), serde_json::json!("s1"));

        let facts = extractor
            .extract("我叫张三，是软件工程师", &Scope::user("u1"), &metadata)
            .await
            .unwrap();

        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].text, "张三是软件工程师");
        assert_eq!(facts[0].scope, Scope::user("u1"));
        assert_eq!(facts[0].metadata, metadata);
    }

    #[tokio::test]
    async fn test_blank_turn_skips_oracle() {
        let oracle = CannedOracle::new(r#"{"facts": ["x"]}"#);
        let extractor = FactExtractor::new(oracle.clone(), &MemoryConfig::default());

        let facts = extractor
            .extract("   ", &Scope::unscoped(), &Metadata::new())
            .await
            .unwrap();

        assert!(facts.is_empty());
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fact_cap_rejects_turn() {
        let oracle = CannedOracle::new(r#"{"facts": ["a", "b", "c"]}"#);
        let config = MemoryConfig {
            max_facts_per_turn: 2,
            ..MemoryConfig::default()
        };
        let extractor = FactExtractor::new(oracle, &config);

        let result = extractor
            .extract("turn", &Scope::unscoped(), &Metadata::new())
            .await;
        assert!(matches!(result, Err(MemoryError::ExtractionFormat(_))));
    }

    #[tokio::test]
    async fn test_fact_cap_is_inclusive() {
        let oracle = CannedOracle::new(r#"{"facts": ["a", "b"]}"#);
        let config = MemoryConfig {
            max_facts_per_turn: 2,
            ..MemoryConfig::default()
        };
        let extractor = FactExtractor::new(oracle, &config);

        let facts = extractor
            .extract("turn", &Scope::unscoped(), &Metadata::new())
            .await
            .unwrap();
        assert_eq!(facts.len(), 2);
    }
}
