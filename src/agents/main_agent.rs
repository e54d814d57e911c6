//! Main Agent
//!
//! Decides, from everything known about the patient so far, one of three
//! actions: request more data, route to the prediction models, or finish.
//! One LLM call per invocation, no retries; when the call or its JSON
//! parsing fails, a numeric-field-count heuristic keeps the pipeline
//! moving with a well-formed decision.

use crate::config::{LLMConfig, ModelSpecs};
use crate::llm::provider::ChatClient;
use crate::payload::Payload;
use crate::types::{LLMMessage, LLMRequest};
use crate::utils::json_extract::{extract_with_rules, string_field, string_list_field, Extraction};
use std::sync::Arc;
use tracing::{info, warn};

/// Missing-parameter list used when nothing better is known.
pub const DEFAULT_MISSING: &[&str] = &["age", "gender", "height", "weight"];

/// Minimum numeric fields for the heuristic fallback to consider the
/// payload routable. An explicit, documented approximation of real
/// requirement checking, reached only when the LLM path is unavailable.
const FALLBACK_ROUTE_THRESHOLD: usize = 8;

/// The Main Agent's orchestration decision.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    NeedMoreData {
        missing: Vec<String>,
        reasoning: String,
    },
    RouteToModels {
        models: Vec<String>,
        reasoning: String,
    },
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum KeywordHint {
    Route,
    NeedData,
}

pub struct MainAgent {
    chat: Arc<dyn ChatClient>,
    provider: String,
    model: String,
    specs: ModelSpecs,
}

impl MainAgent {
    pub fn new(chat: Arc<dyn ChatClient>, llm: &LLMConfig, specs: ModelSpecs) -> Self {
        Self {
            chat,
            provider: llm.provider.clone(),
            model: llm.model.clone(),
            specs,
        }
    }

    /// One decision per call. Never fails outward.
    pub async fn decide(&self, payload: &Payload) -> Decision {
        info!(
            numeric_fields = payload.numeric_field_count(),
            "Main agent deciding next action"
        );

        let request = LLMRequest {
            provider: self.provider.clone(),
            model: self.model.clone(),
            messages: vec![LLMMessage::user(self.create_decision_prompt(payload))],
            max_tokens: Some(1024),
            temperature: Some(0.2),
            system_instruction: Some(self.create_system_prompt()),
        };

        match self.chat.create_chat_completion(&request).await {
            Ok(response) => {
                let decision = Self::parse_decision(&response.content);
                info!(decision = ?decision, "Main agent decision");
                decision
            }
            Err(e) => {
                warn!(error = %e, "Main agent LLM call failed, using numeric-count heuristic");
                Self::fallback_decision(payload)
            }
        }
    }

    /// Parse the strict-JSON reply; keyword rules handle anything less.
    fn parse_decision(reply: &str) -> Decision {
        let rules = [
            ("route", KeywordHint::Route),
            ("missing", KeywordHint::NeedData),
            ("need_more_data", KeywordHint::NeedData),
        ];

        match extract_with_rules(reply, &rules) {
            Extraction::Object(map) => {
                let action = string_field(&map, "action").unwrap_or_default().to_lowercase();
                let reasoning = string_field(&map, "reasoning")
                    .unwrap_or_else(|| "No reasoning provided.".to_string());

                if action.contains("route") {
                    let models = string_field(&map, "next_agent")
                        .and_then(|name| crate::agents::router::normalize_model_name(&name))
                        .map(|m| vec![m])
                        .unwrap_or_default();
                    Decision::RouteToModels { models, reasoning }
                } else if action.contains("complete") || action.contains("finish") {
                    Decision::Complete
                } else if action.contains("need") || action.contains("request") {
                    Decision::NeedMoreData {
                        missing: string_list_field(&map, "missing_if_any"),
                        reasoning,
                    }
                } else {
                    Decision::NeedMoreData {
                        missing: Self::default_missing(),
                        reasoning: format!("Unrecognized action '{}', requesting more data.", action),
                    }
                }
            }
            Extraction::Keyword(KeywordHint::Route) => Decision::RouteToModels {
                models: Vec::new(),
                reasoning: "Reply was not valid JSON but indicated routing.".to_string(),
            },
            Extraction::Keyword(KeywordHint::NeedData) => Decision::NeedMoreData {
                missing: Self::default_missing(),
                reasoning: "Reply was not valid JSON but indicated missing data.".to_string(),
            },
            Extraction::Unparseable => Decision::NeedMoreData {
                missing: Self::default_missing(),
                reasoning: "Could not interpret the model's reply, requesting more data.".to_string(),
            },
        }
    }

    /// Heuristic used when the LLM path is completely unavailable: with at
    /// least FALLBACK_ROUTE_THRESHOLD numeric fields, route; otherwise ask
    /// for the basic demographic set.
    fn fallback_decision(payload: &Payload) -> Decision {
        if payload.numeric_field_count() >= FALLBACK_ROUTE_THRESHOLD {
            Decision::RouteToModels {
                models: Vec::new(),
                reasoning: "Sufficient structured parameters are available for risk prediction."
                    .to_string(),
            }
        } else {
            Decision::NeedMoreData {
                missing: Self::default_missing(),
                reasoning: "Not enough structured parameters for any prediction model."
                    .to_string(),
            }
        }
    }

    fn default_missing() -> Vec<String> {
        DEFAULT_MISSING.iter().map(|s| s.to_string()).collect()
    }

    fn create_system_prompt(&self) -> String {
        let model_descriptions = self
            .specs
            .iter()
            .map(|(id, spec)| {
                format!(
                    "- {}: requires [{}]",
                    id,
                    spec.required_parameters.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You are the main agent of a medical assistant. Based on the patient data available, choose exactly one action:

1. "need_more_data" - critical parameters for every prediction model are missing; ask for them
2. "route_to_models" - enough parameters exist to invoke at least one prediction model
3. "complete" - the request is already fully answered, nothing more to do

AVAILABLE PREDICTION MODELS:
{model_descriptions}

OUTPUT FORMAT (respond with ONLY valid JSON):
{{
  "action": "need_more_data" | "route_to_models" | "complete",
  "reasoning": "one or two sentences explaining the choice",
  "next_agent": "model id to route to, or null",
  "missing_if_any": ["parameter", "names"] or null
}}"#,
        )
    }

    fn create_decision_prompt(&self, payload: &Payload) -> String {
        let free_text = payload.free_text_context();
        let context = if free_text.trim().is_empty() {
            "(no narrative context provided)".to_string()
        } else {
            free_text
        };

        format!(
            r#"PATIENT CONTEXT:
{context}

STRUCTURED PARAMETERS:
{params}

Decide the next action."#,
            params = payload.render_params(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{FailingChatClient, StaticChatClient};
    use crate::config::LLMConfig;

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

    fn payload_with_numeric_fields(count: usize) -> Payload {
        let names = [
            "age", "gender", "height", "weight", "ap_hi", "ap_lo", "cholesterol", "gluc",
            "smoke", "alco", "active",
        ];
        let mut payload = Payload::new();
        for name in names.iter().take(count) {
            payload.insert(*name, 1i64);
        }
        payload
    }

    #[tokio::test]
    async fn test_fallback_below_threshold_requests_demographics() {
        let agent = MainAgent::new(Arc::new(FailingChatClient), &llm_config(), ModelSpecs::default());
        let decision = agent.decide(&payload_with_numeric_fields(7)).await;

        match decision {
            Decision::NeedMoreData { missing, .. } => {
                assert_eq!(missing, vec!["age", "gender", "height", "weight"]);
            }
            other => panic!("expected NeedMoreData, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fallback_at_threshold_routes() {
        let agent = MainAgent::new(Arc::new(FailingChatClient), &llm_config(), ModelSpecs::default());
        let decision = agent.decide(&payload_with_numeric_fields(8)).await;
        assert!(matches!(decision, Decision::RouteToModels { .. }));
    }

    #[tokio::test]
    async fn test_parses_route_decision_from_json() {
        let chat = Arc::new(StaticChatClient::new(
            r#"```json
{"action": "route_to_models", "reasoning": "all cardio parameters present", "next_agent": "cardiovascular_risk", "missing_if_any": null}
```"#,
        ));
        let agent = MainAgent::new(chat, &llm_config(), ModelSpecs::default());
        let decision = agent.decide(&payload_with_numeric_fields(11)).await;

        match decision {
            Decision::RouteToModels { models, reasoning } => {
                assert_eq!(models, vec!["cardiovascular_risk"]);
                assert!(reasoning.contains("cardio"));
            }
            other => panic!("expected RouteToModels, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_null_missing_list_coerces_to_empty() {
        let chat = Arc::new(StaticChatClient::new(
            r#"{"action": "need_more_data", "reasoning": "bp missing", "next_agent": null, "missing_if_any": ["ap_hi", "ap_lo"]}"#,
        ));
        let agent = MainAgent::new(chat, &llm_config(), ModelSpecs::default());
        let decision = agent.decide(&payload_with_numeric_fields(3)).await;

        match decision {
            Decision::NeedMoreData { missing, .. } => {
                assert_eq!(missing, vec!["ap_hi", "ap_lo"]);
            }
            other => panic!("expected NeedMoreData, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_action() {
        let chat = Arc::new(StaticChatClient::new(
            r#"{"action": "complete", "reasoning": "nothing left to do", "next_agent": null, "missing_if_any": null}"#,
        ));
        let agent = MainAgent::new(chat, &llm_config(), ModelSpecs::default());
        let decision = agent.decide(&Payload::new()).await;
        assert_eq!(decision, Decision::Complete);
    }

    #[tokio::test]
    async fn test_keyword_fallback_on_prose_reply() {
        let chat = Arc::new(StaticChatClient::new(
            "I think we should route this patient to the cardiovascular model.",
        ));
        let agent = MainAgent::new(chat, &llm_config(), ModelSpecs::default());
        let decision = agent.decide(&payload_with_numeric_fields(11)).await;
        assert!(matches!(decision, Decision::RouteToModels { .. }));
    }

    #[tokio::test]
    async fn test_unparseable_reply_defaults_to_need_more_data() {
        let chat = Arc::new(StaticChatClient::new("Hello! How can I help you today?"));
        let agent = MainAgent::new(chat, &llm_config(), ModelSpecs::default());
        let decision = agent.decide(&Payload::new()).await;

        match decision {
            Decision::NeedMoreData { missing, .. } => {
                assert_eq!(missing, vec!["age", "gender", "height", "weight"]);
            }
            other => panic!("expected NeedMoreData, got {:?}", other),
        }
    }
}
