//! Locating the JSON object inside an LLM answer.
//!
//! Models often wrap JSON in a Markdown fence or add a sentence around it.
//! Both are tolerated; anything that still is not a JSON object is left
//! to the caller to reject.

use serde_json::Value;

/// Strip one surrounding Markdown code fence, if present
fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(after_start) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Skip language identifier if present
    let body = match after_start.find('\n') {
        Some(i) => &after_start[i + 1..],
        None => after_start,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// The JSON object carried by `response`, if any
pub fn json_object(response: &str) -> Option<Value> {
    let body = strip_code_fence(response);

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body) {
        return Some(value);
    }

    // Fall back to the outermost braces
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&body[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}
