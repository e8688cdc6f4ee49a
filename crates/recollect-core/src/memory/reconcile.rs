//! ============================================================================
//! Reconciliation - ADD / UPDATE / DELETE / NONE for one candidate fact
//! ============================================================================
//! Similarity only decides which memories are shown to the classification
//! oracle; the oracle's textual judgment decides what happens to them.
//!
//! ```text
//! candidates empty ──────────────► ADD
//! identical text in candidates ──► NONE
//! otherwise ── oracle verdict ──► parse ──► resolve target ──► Decision
//! ```
//!
//! Candidates are shown to the oracle under positional ids ("0" is the
//! best match) so a hallucinated UUID can never reach the store.
//! ============================================================================

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::error::{MemoryError, Result};
use super::response::json_object;
use super::types::{CandidateFact, Decision, MemoryEvent, ScoredMemory};

/// An existing memory as presented to the classification oracle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleCandidate {
    pub id: String,
    pub text: String,
}

/// External judgment of how a new fact relates to existing memories
#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    /// Raw oracle answer for `fact` against `candidates`
    async fn classify(&self, fact: &str, candidates: &[OracleCandidate]) -> Result<String>;
}

/// A classification answer that passed boundary validation
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub event: MemoryEvent,
    /// Positions in the candidate set, as named by the oracle
    pub targets: Vec<usize>,
    /// Merged or rewritten text, when given
    pub text: Option<String>,
}

/// Parse an oracle answer for a candidate set of `candidate_count` entries.
///
/// Unknown events, mistyped fields and ids outside the presented set are
/// rejected, never coerced.
pub fn parse_verdict(raw: &str, candidate_count: usize) -> Result<Verdict> {
    let object = json_object(raw).ok_or_else(|| {
        MemoryError::ClassificationParse(format!(
            "no JSON object in answer: {}",
            raw.chars().take(200).collect::<String>()
        ))
    })?;

    let event = match object.get("event") {
        Some(value @ Value::String(_)) => serde_json::from_value::<MemoryEvent>(value.clone())
            .map_err(|_| MemoryError::ClassificationParse(format!("unknown event {}", value)))?,
        Some(other) => {
            return Err(MemoryError::ClassificationParse(format!(
                "event is not a string: {}",
                other
            )))
        }
        None => return Err(MemoryError::ClassificationParse("answer has no event".into())),
    };

    let targets = match object.get("target") {
        None | Some(Value::Null) => vec![],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| parse_target(item, candidate_count))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect(),
        Some(single) => parse_target(single, candidate_count)?.into_iter().collect(),
    };

    let text = match object.get("text") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(other) => {
            return Err(MemoryError::ClassificationParse(format!(
                "text is not a string: {}",
                other
            )))
        }
    };

    Ok(Verdict {
        event,
        targets,
        text,
    })
}

/// One target id; blank strings count as "no target"
fn parse_target(value: &Value, candidate_count: usize) -> Result<Option<usize>> {
    let position = match value {
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        _ => None,
    };

    match position {
        Some(p) if p < candidate_count => Ok(Some(p)),
        _ => Err(MemoryError::ClassificationParse(format!(
            "target {} is not one of the {} presented memories",
            value, candidate_count
        ))),
    }
}

/// Decides what one candidate fact does to the store
pub struct Reconciler {
    oracle: Arc<dyn ClassificationOracle>,
}

impl Reconciler {
    pub fn new(oracle: Arc<dyn ClassificationOracle>) -> Self {
        Self { oracle }
    }

    /// Exactly one decision for `fact` against `candidates` (best first)
    pub async fn decide(
        &self,
        fact: &CandidateFact,
        candidates: &[ScoredMemory],
    ) -> Result<Decision> {
        if candidates.is_empty() {
            return Ok(Decision::Add {
                text: fact.text.clone(),
            });
        }

        let fact_text = fact.text.trim();
        if let Some(same) = candidates
            .iter()
            .find(|c| c.memory.text.trim() == fact_text)
        {
            debug!(fact = %fact.text, memory_id = %same.memory.id, "Fact already stored verbatim");
            return Ok(Decision::None);
        }

        let presented: Vec<OracleCandidate> = candidates
            .iter()
            .enumerate()
            .map(|(position, c)| OracleCandidate {
                id: position.to_string(),
                text: c.memory.text.clone(),
            })
            .collect();

        let raw = self.oracle.classify(&fact.text, &presented).await?;
        let verdict = parse_verdict(&raw, candidates.len())?;

        debug!(
            fact = %fact.text,
            event = %verdict.event,
            targets = ?verdict.targets,
            "Classified fact"
        );

        resolve(fact, verdict, candidates)
    }

    /// Second, independent decision after a DELETE removed one candidate.
    ///
    /// One fact may delete at most one memory, so a second DELETE is
    /// refused rather than applied.
    pub async fn decide_after_delete(
        &self,
        fact: &CandidateFact,
        remaining: &[ScoredMemory],
    ) -> Result<Decision> {
        match self.decide(fact, remaining).await? {
            Decision::Delete { id } => Err(MemoryError::AmbiguousReconciliation(format!(
                "fact \"{}\" contradicts more than one memory (second target {})",
                fact.text, id
            ))),
            decision => Ok(decision),
        }
    }
}

/// Turn a validated verdict into a decision against concrete memories
fn resolve(fact: &CandidateFact, verdict: Verdict, candidates: &[ScoredMemory]) -> Result<Decision> {
    match verdict.event {
        MemoryEvent::None => Ok(Decision::None),
        MemoryEvent::Add => Ok(Decision::Add {
            text: verdict.text.unwrap_or_else(|| fact.text.clone()),
        }),
        MemoryEvent::Update => {
            let target = &candidates[pick_target(fact, &verdict, candidates.len())?].memory;
            let text = verdict.text.unwrap_or_else(|| fact.text.clone());
            if text == target.text {
                return Ok(Decision::None);
            }
            Ok(Decision::Update {
                id: target.id,
                text,
            })
        }
        MemoryEvent::Delete => {
            let target = &candidates[pick_target(fact, &verdict, candidates.len())?].memory;
            Ok(Decision::Delete { id: target.id })
        }
    }
}

/// Best-ranked named target; implied only when a single memory was shown
fn pick_target(fact: &CandidateFact, verdict: &Verdict, candidate_count: usize) -> Result<usize> {
    if let Some(best) = verdict.targets.iter().min() {
        return Ok(*best);
    }
    if candidate_count == 1 {
        return Ok(0);
    }
    Err(MemoryError::AmbiguousReconciliation(format!(
        "{} for \"{}\" names no target among {} memories",
        verdict.event, fact.text, candidate_count
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryRecord, Metadata, Scope};
    use std::sync::Mutex;

    /// Returns a fixed answer and records what it was shown
    struct ScriptedOracle {
        answer: String,
        seen: Mutex<Vec<Vec<OracleCandidate>>>,
    }

    impl ScriptedOracle {
        fn new(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.to_string(),
                seen: Mutex::new(vec![]),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ClassificationOracle for ScriptedOracle {
        async fn classify(&self, _fact: &str, candidates: &[OracleCandidate]) -> Result<String> {
            self.seen.lock().unwrap().push(candidates.to_vec());
            Ok(self.answer.clone())
        }
    }

    fn fact(text: &str) -> CandidateFact {
        CandidateFact {
            text: text.to_string(),
            scope: Scope::user("u1"),
            metadata: Metadata::new(),
        }
    }

    fn candidate(text: &str, score: f32) -> ScoredMemory {
        ScoredMemory {
            memory: MemoryRecord::new(text.to_string(), vec![], Scope::user("u1"), Metadata::new()),
            score,
        }
    }

    #[test]
    fn test_parse_verdict_shapes() {
        let verdict =
            parse_verdict(r#"{"event": "UPDATE", "target": "1", "text": "merged"}"#, 2).unwrap();
        assert_eq!(verdict.event, MemoryEvent::Update);
        assert_eq!(verdict.targets, vec![1]);
        assert_eq!(verdict.text.as_deref(), Some("merged"));

        let verdict = parse_verdict(r#"{"event": "DELETE", "target": [2, "0"]}"#, 3).unwrap();
        assert_eq!(verdict.targets, vec![2, 0]);

        let verdict = parse_verdict(r#"{"event": "NONE", "target": "", "text": null}"#, 1).unwrap();
        assert!(verdict.targets.is_empty());
        assert!(verdict.text.is_none());
    }

    #[test]
    fn test_parse_verdict_rejects() {
        for raw in [
            "sounds like an update to me",
            r#"{"event": "MERGE"}"#,
            r#"{"event": "update"}"#,
            r#"{"event": 3}"#,
            r#"{"target": "0"}"#,
            r#"{"event": "UPDATE", "target": "7"}"#,
            r#"{"event": "UPDATE", "target": "5c1c7f9e-0000-0000-0000-000000000000"}"#,
            r#"{"event": "UPDATE", "target": {"id": "0"}}"#,
            r#"{"event": "ADD", "text": ["a"]}"#,
        ] {
            assert!(
                matches!(parse_verdict(raw, 2), Err(MemoryError::ClassificationParse(_))),
                "accepted {}",
                raw
            );
        }
    }

    #[tokio::test]
    async fn test_empty_candidates_add_without_oracle() {
        let oracle = ScriptedOracle::new(r#"{"event": "NONE"}"#);
        let reconciler = Reconciler::new(oracle.clone());

        let decision = reconciler.decide(&fact("Likes tea"), &[]).await.unwrap();

        assert_eq!(
            decision,
            Decision::Add {
                text: "Likes tea".into()
            }
        );
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_identical_text_is_none_without_oracle() {
        let oracle = ScriptedOracle::new(r#"{"event": "ADD"}"#);
        let reconciler = Reconciler::new(oracle.clone());

        let decision = reconciler
            .decide(&fact("Likes tea"), &[candidate("Likes tea", 0.99)])
            .await
            .unwrap();

        assert_eq!(decision, Decision::None);
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_update_uses_merged_text() {
        let oracle =
            ScriptedOracle::new(r#"{"event": "UPDATE", "target": "0", "text": "Likes green tea"}"#);
        let reconciler = Reconciler::new(oracle.clone());
        let existing = candidate("Likes tea", 0.9);
        let id = existing.memory.id;

        let decision = reconciler
            .decide(&fact("Prefers green tea"), &[existing])
            .await
            .unwrap();

        assert_eq!(
            decision,
            Decision::Update {
                id,
                text: "Likes green tea".into()
            }
        );
        let seen = oracle.seen.lock().unwrap();
        assert_eq!(seen[0][0].id, "0");
        assert_eq!(seen[0][0].text, "Likes tea");
    }

    #[tokio::test]
    async fn test_update_without_text_uses_fact() {
        let oracle = ScriptedOracle::new(r#"{"event": "UPDATE", "target": "0"}"#);
        let reconciler = Reconciler::new(oracle);
        let existing = candidate("张三是软件工程师", 0.8);
        let id = existing.memory.id;

        let decision = reconciler
            .decide(&fact("张三是产品经理"), &[existing])
            .await
            .unwrap();

        assert_eq!(
            decision,
            Decision::Update {
                id,
                text: "张三是产品经理".into()
            }
        );
    }

    #[tokio::test]
    async fn test_several_targets_prefer_best_ranked() {
        let oracle = ScriptedOracle::new(r#"{"event": "DELETE", "target": ["2", "1"]}"#);
        let reconciler = Reconciler::new(oracle);
        let candidates = vec![
            candidate("Lives in Paris", 0.9),
            candidate("Lives in Rome", 0.8),
            candidate("Lives in Oslo", 0.7),
        ];
        let expected = candidates[1].memory.id;

        let decision = reconciler
            .decide(&fact("Lives in Berlin"), &candidates)
            .await
            .unwrap();

        assert_eq!(decision, Decision::Delete { id: expected });
    }

    #[tokio::test]
    async fn test_missing_target_is_ambiguous() {
        let oracle = ScriptedOracle::new(r#"{"event": "DELETE"}"#);
        let reconciler = Reconciler::new(oracle);
        let candidates = vec![candidate("A", 0.9), candidate("B", 0.8)];

        let result = reconciler.decide(&fact("C"), &candidates).await;

        assert!(matches!(result, Err(MemoryError::AmbiguousReconciliation(_))));
    }

    #[tokio::test]
    async fn test_single_candidate_target_is_implied() {
        let oracle = ScriptedOracle::new(r#"{"event": "DELETE"}"#);
        let reconciler = Reconciler::new(oracle);
        let only = candidate("Is vegetarian", 0.9);
        let id = only.memory.id;

        let decision = reconciler
            .decide(&fact("Eats meat"), &[only])
            .await
            .unwrap();

        assert_eq!(decision, Decision::Delete { id });
    }

    #[tokio::test]
    async fn test_update_to_same_text_is_none() {
        let oracle =
            ScriptedOracle::new(r#"{"event": "UPDATE", "target": "0", "text": "Likes tea"}"#);
        let reconciler = Reconciler::new(oracle);

        let decision = reconciler
            .decide(&fact("Enjoys tea"), &[candidate("Likes tea", 0.9)])
            .await
            .unwrap();

        assert_eq!(decision, Decision::None);
    }

    #[tokio::test]
    async fn test_second_delete_refused() {
        let oracle = ScriptedOracle::new(r#"{"event": "DELETE", "target": "0"}"#);
        let reconciler = Reconciler::new(oracle);

        let result = reconciler
            .decide_after_delete(&fact("Lives in Berlin"), &[candidate("Lives in Rome", 0.7)])
            .await;

        assert!(matches!(result, Err(MemoryError::AmbiguousReconciliation(_))));
    }

    #[tokio::test]
    async fn test_after_delete_with_nothing_left_adds() {
        let oracle = ScriptedOracle::new(r#"{"event": "DELETE", "target": "0"}"#);
        let reconciler = Reconciler::new(oracle.clone());

        let decision = reconciler
            .decide_after_delete(&fact("Eats meat"), &[])
            .await
            .unwrap();

        assert_eq!(
            decision,
            Decision::Add {
                text: "Eats meat".into()
            }
        );
        assert_eq!(oracle.calls(), 0);
    }
}
