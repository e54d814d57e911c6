//! Parameter Extractor
//!
//! Turns free-form patient text into the structured parameter fields the
//! prediction models understand, via one LLM call with a fixed extraction
//! prompt. All failures are recovered locally: the worst case is a
//! minimal payload that keeps the raw text for the downstream agents.

use crate::config::LLMConfig;
use crate::llm::provider::ChatClient;
use crate::payload::Payload;
use crate::types::{LLMMessage, LLMRequest};
use crate::utils::json_extract::{extract_json_object, is_null_literal};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Parameter keys the extractor is allowed to populate.
const EXTRACTION_KEYS: &[&str] = &[
    "age",
    "gender",
    "height",
    "weight",
    "ap_hi",
    "ap_lo",
    "cholesterol",
    "gluc",
    "smoke",
    "alco",
    "active",
    "hypertension",
    "heart_disease",
    "smoking_history",
    "bmi",
    "HbA1c_level",
    "blood_glucose_level",
];

pub struct ParameterExtractor {
    chat: Arc<dyn ChatClient>,
    provider: String,
    model: String,
}

impl ParameterExtractor {
    pub fn new(chat: Arc<dyn ChatClient>, llm: &LLMConfig) -> Self {
        Self {
            chat,
            provider: llm.provider.clone(),
            model: llm.model.clone(),
        }
    }

    /// Extract structured parameters from the payload's free text.
    ///
    /// Fields already present in the input payload are preserved and take
    /// precedence over extracted duplicates. Never fails outward: any
    /// call or parse failure degrades to the minimal fallback payload.
    pub async fn extract(&self, payload: &Payload) -> Payload {
        let raw_text = payload.get_text("patient_text").unwrap_or_default();
        info!(text_len = raw_text.len(), "Extracting parameters from patient text");

        let request = LLMRequest {
            provider: self.provider.clone(),
            model: self.model.clone(),
            messages: vec![LLMMessage::user(Self::create_extraction_prompt(raw_text))],
            max_tokens: Some(1024),
            temperature: Some(0.1), // extraction should be deterministic
            system_instruction: Some(
                "You are a medical data extraction assistant. You read free-form patient \
                 descriptions and return structured parameters as a single JSON object."
                    .to_string(),
            ),
        };

        match self.chat.create_chat_completion(&request).await {
            Ok(response) => match extract_json_object(&response.content) {
                Some(map) => {
                    let extracted = Self::merge_extracted(payload, &map, raw_text);
                    info!(
                        field_count = extracted.len(),
                        "Parameter extraction complete"
                    );
                    extracted
                }
                None => {
                    warn!("Extraction reply contained no parseable JSON, using fallback payload");
                    Self::fallback_payload(payload, raw_text)
                }
            },
            Err(e) => {
                warn!(error = %e, "Extraction LLM call failed, using fallback payload");
                Self::fallback_payload(payload, raw_text)
            }
        }
    }

    /// Build the output payload: extracted parameters first, then every
    /// input field layered on top so originals win over duplicates.
    fn merge_extracted(
        input: &Payload,
        extracted: &serde_json::Map<String, Value>,
        raw_text: &str,
    ) -> Payload {
        let mut result = Payload::new();

        for key in EXTRACTION_KEYS {
            let Some(value) = extracted.get(*key) else {
                continue;
            };
            match value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        result.insert(*key, i);
                    } else if let Some(f) = n.as_f64() {
                        result.insert(*key, f);
                    }
                }
                Value::String(s) if !is_null_literal(s) => {
                    result.insert(*key, s.clone());
                }
                Value::Bool(b) => {
                    result.insert(*key, i64::from(*b));
                }
                _ => {} // null or unusable shape: leave the field absent
            }
        }

        for (name, value) in input.iter() {
            result.insert(name.clone(), value.clone());
        }

        if !result.contains("patient_history") && !raw_text.trim().is_empty() {
            result.insert("patient_history", raw_text);
        }

        result
    }

    /// Minimal payload returned when extraction fails: keeps the raw text
    /// and the user's question so the rest of the pipeline still works.
    fn fallback_payload(input: &Payload, raw_text: &str) -> Payload {
        let mut result = Payload::new();
        result.insert("query", input.get_text("query").unwrap_or_default());
        result.insert("patient_history", raw_text);
        result.insert("symptoms", "");
        result.insert(
            "medical_report",
            input.get_text("additional_notes").unwrap_or_default(),
        );
        result
    }

    fn create_extraction_prompt(raw_text: &str) -> String {
        let keys = EXTRACTION_KEYS.join(", ");
        format!(
            r#"Extract medical parameters from the following patient description.

PATIENT TEXT:
{raw_text}

PARAMETERS TO EXTRACT:
{keys}

GUIDELINES:
- gender: 1 for female, 2 for male
- ap_hi / ap_lo: systolic / diastolic blood pressure in mmHg
- cholesterol and gluc: 1 = normal, 2 = above normal, 3 = well above normal
- smoke, alco, active, hypertension, heart_disease: 1 if present, 0 if absent
- smoking_history: one of "never", "former", "current", "not known"
- Use null for anything not mentioned in the text
- Do NOT guess values that are not stated or clearly implied

OUTPUT FORMAT (respond with ONLY a single JSON object):
{{"age": 55, "gender": 2, "height": null, ...}}"#,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{FailingChatClient, StaticChatClient};
    use crate::payload::FieldValue;

    fn llm_config() -> LLMConfig {
        LLMConfig {
            provider: "groq".to_string(),
            model: "test-model".to_string(),
            groq_api_key: "key".to_string(),
            gemini_api_key: String::new(),
            openai_api_key: String::new(),
            api_base: None,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_extracts_parameters_from_json_reply() {
        let chat = Arc::new(StaticChatClient::new(
            "```json\n{\"age\": 55, \"gender\": 2, \"height\": null, \"weight\": \"90\", \"smoke\": true}\n```",
        ));
        let extractor = ParameterExtractor::new(chat, &llm_config());

        let mut input = Payload::new();
        input.insert("patient_text", "55 year old male smoker, 90kg");
        input.insert("query", "cardiac risk?");

        let result = extractor.extract(&input).await;
        assert_eq!(result.get("age"), Some(&FieldValue::Int(55)));
        assert_eq!(result.get("gender"), Some(&FieldValue::Int(2)));
        assert_eq!(result.get("smoke"), Some(&FieldValue::Int(1)));
        assert_eq!(result.get_text("weight"), Some("90"));
        assert!(!result.contains("height")); // null stays absent
        assert_eq!(result.get_text("query"), Some("cardiac risk?"));
        assert_eq!(
            result.get_text("patient_history"),
            Some("55 year old male smoker, 90kg")
        );
    }

    #[tokio::test]
    async fn test_input_fields_take_precedence() {
        let chat = Arc::new(StaticChatClient::new(r#"{"age": 40}"#));
        let extractor = ParameterExtractor::new(chat, &llm_config());

        let mut input = Payload::new();
        input.insert("patient_text", "a patient");
        input.insert("age", 60i64);

        let result = extractor.extract(&input).await;
        assert_eq!(result.get("age"), Some(&FieldValue::Int(60)));
    }

    #[tokio::test]
    async fn test_llm_failure_degrades_to_fallback_payload() {
        let chat = Arc::new(FailingChatClient);
        let extractor = ParameterExtractor::new(chat, &llm_config());

        let mut input = Payload::new();
        input.insert("patient_text", "raw description");
        input.insert("query", "am I at risk?");
        input.insert("additional_notes", "ECG pending");

        let result = extractor.extract(&input).await;
        assert_eq!(result.get_text("query"), Some("am I at risk?"));
        assert_eq!(result.get_text("patient_history"), Some("raw description"));
        assert_eq!(result.get_text("symptoms"), Some(""));
        assert_eq!(result.get_text("medical_report"), Some("ECG pending"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_degrades_to_fallback_payload() {
        let chat = Arc::new(StaticChatClient::new("I could not find any parameters."));
        let extractor = ParameterExtractor::new(chat, &llm_config());

        let mut input = Payload::new();
        input.insert("patient_text", "raw description");

        let result = extractor.extract(&input).await;
        assert_eq!(result.get_text("patient_history"), Some("raw description"));
        assert!(!result.contains("age"));
    }
}
