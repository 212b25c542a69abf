//! Detection of structured output written into reply text.
//!
//! Agents sometimes print the JSON they were meant to pass as a tool call.
//! Such replies must never reach the user.

use serde_json::Value;

pub const STRUCTURED_OUTPUT_REASON: &str =
    "You must call this function as a tool call instead of writing the JSON directly.";

/// True if `text` contains a JSON object with at least one key, or an array
/// holding an object. Python-style literals (`True`, `False`, `None`,
/// single quotes) are tolerated.
pub fn contains_structured_block(text: &str) -> bool {
    let text = text.trim_start();
    let text = text.strip_prefix("AI:").unwrap_or(text);
    let normalized = normalize_literals(text);

    normalized
        .char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .any(|(start, _)| parses_as_structure(&normalized[start..]))
}

fn parses_as_structure(candidate: &str) -> bool {
    let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(map))) => !map.is_empty(),
        Some(Ok(Value::Array(items))) => items.iter().any(Value::is_object),
        _ => false,
    }
}

fn normalize_literals(text: &str) -> String {
    text.replace("True", "true")
        .replace("False", "false")
        .replace("None", "null")
        .replace('\'', "\"")
}
