//! Patient Payload
//!
//! The evolving field -> value record describing one assessment request.
//! Free-text fields carry narrative context (history, symptoms, the user's
//! question); everything else is a candidate numeric/categorical parameter
//! for the downstream prediction models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fields treated as narrative text rather than model parameters.
pub const FREE_TEXT_FIELDS: &[&str] = &[
    "patient_text",
    "patient_history",
    "symptoms",
    "medical_report",
    "query",
    "additional_notes",
];

/// Known parameter aliases: payload key -> canonical model parameter name.
const PARAM_ALIASES: &[(&str, &str)] = &[
    ("glucose", "gluc"),
    ("smoking", "smoke"),
    ("alcohol", "alco"),
    ("activity", "active"),
];

/// A single payload value. Extractors sometimes stringify numbers, so a
/// text value that parses as a number still counts as numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// JSON rendering that preserves integer-ness where possible.
    pub fn to_number_value(&self) -> Option<serde_json::Value> {
        match self {
            FieldValue::Int(i) => Some(serde_json::Value::from(*i)),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
            FieldValue::Text(s) => {
                let t = s.trim();
                if let Ok(i) = t.parse::<i64>() {
                    Some(serde_json::Value::from(i))
                } else if let Ok(f) = t.parse::<f64>() {
                    serde_json::Number::from_f64(f).map(serde_json::Value::Number)
                } else {
                    None
                }
            }
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// Everything known about a patient so far, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload {
    fields: BTreeMap<String, FieldValue>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_text())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn is_free_text_field(name: &str) -> bool {
        FREE_TEXT_FIELDS.contains(&name)
    }

    /// Number of numeric-valued parameter fields (free text excluded).
    pub fn numeric_field_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|(name, value)| !Self::is_free_text_field(name) && value.is_numeric())
            .count()
    }

    /// Parameter fields (numeric or categorical string, e.g.
    /// `smoking_history: "never"`) with known aliases normalized to the
    /// canonical model parameter names. When a payload carries both the
    /// alias and the canonical key, the canonical key wins and the alias
    /// is discarded, so a value never appears under both.
    pub fn normalized_params(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut params = serde_json::Map::new();
        for (name, value) in &self.fields {
            if Self::is_free_text_field(name) {
                continue;
            }
            let rendered = match value.to_number_value() {
                Some(number) => number,
                None => match value {
                    FieldValue::Text(s) if !crate::utils::json_extract::is_null_literal(s) => {
                        serde_json::Value::String(s.trim().to_string())
                    }
                    _ => continue,
                },
            };
            let canonical = PARAM_ALIASES
                .iter()
                .find(|(alias, _)| *alias == name.as_str())
                .map(|(_, canonical)| canonical.to_string())
                .unwrap_or_else(|| name.clone());
            if canonical != *name && self.fields.contains_key(&canonical) {
                continue; // canonical key present, alias loses
            }
            params.insert(canonical, rendered);
        }
        params
    }

    /// Concatenated narrative context from the free-text fields present.
    pub fn free_text_context(&self) -> String {
        let mut context = String::new();
        for name in FREE_TEXT_FIELDS {
            if let Some(FieldValue::Text(text)) = self.fields.get(*name) {
                if !text.trim().is_empty() {
                    context.push_str(&format!("{}: {}\n", name, text.trim()));
                }
            }
        }
        context
    }

    /// Human-readable rendering of the parameter subset, for inclusion in
    /// agent prompts.
    pub fn render_params(&self) -> String {
        let params = self.normalized_params();
        if params.is_empty() {
            return "(no structured parameters available)".to_string();
        }
        params
            .iter()
            .map(|(k, v)| format!("- {}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromIterator<(String, FieldValue)> for Payload {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
