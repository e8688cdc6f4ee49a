//! System prompts for the extraction and classification oracles.

use super::reconcile::OracleCandidate;

/// Turns one conversation turn into atomic facts
pub const FACT_EXTRACTION_PROMPT: &str = r#"You extract durable personal facts from a conversation turn.

Rules:
- Each fact is one atomic, self-contained statement.
- Replace pronouns with the person or thing they refer to.
- Never join unrelated statements with "and"; emit them separately.
- Skip greetings, small talk and anything with no lasting value.
- Write facts in the language of the conversation.

Respond with ONLY a JSON object of the form {"facts": ["fact 1", "fact 2"]}.
If nothing is worth remembering, respond with {"facts": []}.

Examples:
Input: 你好！
Output: {"facts": []}

Input: 我叫张三，是软件工程师
Output: {"facts": ["张三是软件工程师"]}

Input: I moved to Berlin last month and I'm vegetarian now.
Output: {"facts": ["Moved to Berlin last month", "Is vegetarian"]}"#;

/// Decides how one new fact relates to the memories it was retrieved with
pub const MEMORY_CLASSIFICATION_PROMPT: &str = r#"You maintain a deduplicated memory store.
You receive one NEW FACT and a list of EXISTING MEMORIES, each with a short id.
Choose exactly one event:

- NONE: the new fact is already stated by, or strictly contained in, an existing memory.
- UPDATE: the new fact is about the same subject as one existing memory and refines,
  extends or changes it. Give the memory id as "target" and the merged statement as "text".
- DELETE: the new fact directly contradicts an existing memory that should no longer be kept.
  Give that memory id as "target".
- ADD: the new fact is new information unrelated to every existing memory.

Respond with ONLY a JSON object:
{"event": "ADD" | "UPDATE" | "DELETE" | "NONE", "target": "<id or null>", "text": "<merged text or null>"}

Use only ids from the EXISTING MEMORIES list. Never invent ids."#;

/// Render the user message for a classification request
pub fn classification_input(fact: &str, candidates: &[OracleCandidate]) -> String {
    serde_json::json!({
        "new_fact": fact,
        "existing_memories": candidates,
    })
    .to_string()
}
