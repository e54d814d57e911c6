//! Tolerant JSON extraction
//!
//! LLM replies are supposed to contain a single JSON object, but in
//! practice arrive wrapped in Markdown code fences, preceded by prose, or
//! malformed. Every agent shares this one extraction strategy:
//! strip fences, isolate the outermost `{...}` substring, parse; on
//! failure apply an ordered list of keyword rules; on failure report a
//! typed unparseable result.

use serde_json::{Map, Value};

/// Result of a tolerant extraction attempt with agent-supplied keyword
/// fallback rules.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction<T> {
    /// A JSON object was found and parsed.
    Object(Map<String, Value>),
    /// No JSON, but one of the keyword rules matched the raw text.
    Keyword(T),
    /// Neither JSON nor any keyword rule applied.
    Unparseable,
}

/// Strip a Markdown code-fence wrapper (```json ... ``` or ``` ... ```)
/// if one is present, returning the inner text.
pub fn strip_code_fences(reply: &str) -> &str {
    if reply.contains("```json") {
        reply
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(reply)
            .trim()
    } else if reply.contains("```") {
        reply.split("```").nth(1).unwrap_or(reply).trim()
    } else {
        reply.trim()
    }
}

/// Extract and parse the outermost JSON object from a raw LLM reply.
pub fn extract_json_object(reply: &str) -> Option<Map<String, Value>> {
    let stripped = strip_code_fences(reply);
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&stripped[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Full tolerant extraction: JSON first, then the keyword rules in the
/// order given (first matching substring of the lowercased reply wins).
pub fn extract_with_rules<T: Clone>(reply: &str, rules: &[(&str, T)]) -> Extraction<T> {
    if let Some(map) = extract_json_object(reply) {
        return Extraction::Object(map);
    }
    let lower = reply.to_lowercase();
    for (needle, outcome) in rules {
        if lower.contains(needle) {
            return Extraction::Keyword(outcome.clone());
        }
    }
    Extraction::Unparseable
}

/// Read a string field from a parsed object, treating JSON null and the
/// literal strings "null"/"None" as absent.
pub fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) if !is_null_literal(s) => Some(s.clone()),
        _ => None,
    }
}

/// Read a list-of-strings field, coercing null/absent to an empty list
/// and accepting a bare string as a one-element list.
pub fn string_list_field(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !is_null_literal(s))
            .map(|s| s.to_string())
            .collect(),
        Some(Value::String(s)) if !is_null_literal(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// The literal strings LLMs emit for "no value".
pub fn is_null_literal(s: &str) -> bool {
    let t = s.trim();
    t.is_empty() || t.eq_ignore_ascii_case("null") || t == "None"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bare_json() {
        let map = extract_json_object(r#"{"action": "route", "reasoning": "enough data"}"#).unwrap();
        assert_eq!(map.get("action").unwrap(), "route");
    }

    #[test]
    fn test_fence_wrapping_is_idempotent() {
        let bare = r#"{"decision": "invoke", "models_to_invoke": ["cardiovascular_risk"]}"#;
        let fenced = format!("```json\n{}\n```", bare);

        let from_bare = extract_json_object(bare).unwrap();
        let from_fenced = extract_json_object(&fenced).unwrap();
        assert_eq!(from_bare, from_fenced);
    }

    #[test]
    fn test_extract_json_with_surrounding_prose() {
        let reply = "Sure, here is my decision:\n{\"action\": \"complete\"}\nLet me know!";
        let map = extract_json_object(reply).unwrap();
        assert_eq!(map.get("action").unwrap(), "complete");
    }

    #[test]
    fn test_plain_fence_without_language_tag() {
        let reply = "```\n{\"action\": \"route\"}\n```";
        let map = extract_json_object(reply).unwrap();
        assert_eq!(map.get("action").unwrap(), "route");
    }

    #[test]
    fn test_keyword_rules_apply_in_order() {
        let rules = [("route", 1u8), ("missing", 2u8)];
        // Both substrings present: the first rule wins.
        let result = extract_with_rules("we should route, data is not missing", &rules);
        assert_eq!(result, Extraction::Keyword(1));
    }

    #[test]
    fn test_unparseable() {
        let rules = [("route", 1u8)];
        let result = extract_with_rules("I cannot help with that.", &rules);
        assert_eq!(result, Extraction::Unparseable);
    }

    #[test]
    fn test_null_list_coerces_to_empty() {
        let map = extract_json_object(r#"{"missing_if_any": null}"#).unwrap();
        assert!(string_list_field(&map, "missing_if_any").is_empty());
        assert!(string_list_field(&map, "absent_key").is_empty());
    }

    #[test]
    fn test_null_literal_strings() {
        assert!(is_null_literal("null"));
        assert!(is_null_literal("None"));
        assert!(is_null_literal("  NULL "));
        assert!(!is_null_literal("none of the above"));
    }
}
