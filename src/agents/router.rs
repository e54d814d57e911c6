//! Router Agent
//!
//! Given a payload the Main Agent judged routable, asks the LLM which
//! prediction model(s) to invoke, calls them, and triggers report
//! generation. Every failure mode lands on a well-formed outcome: a
//! missing-data request or a predictions bundle. A deterministic
//! rule-based fallback (exact required-parameter-set matching against the
//! model specifications) covers the case where the LLM is unreachable, so
//! routing always terminates even with no LLM access.

use crate::config::{LLMConfig, ModelSpecs};
use crate::llm::provider::ChatClient;
use crate::payload::Payload;
use crate::tools::prediction::{PredictionClient, PredictionRecord};
use crate::tools::report::ReportClient;
use crate::types::{AppResult, LLMMessage, LLMRequest};
use crate::utils::json_extract::{
    extract_json_object, extract_with_rules, string_field, string_list_field, Extraction,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

const REPORT_FAILED: &str = "Report generation failed";

/// Map natural-language model names to canonical identifiers. Unrecognized
/// names yield None and are dropped by the caller with a trace note.
pub fn normalize_model_name(name: &str) -> Option<String> {
    let lower = name.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if lower.contains("cardio") || lower.contains("heart") {
        Some("cardiovascular_risk".to_string())
    } else if lower.contains("diabet") {
        Some("diabetes_risk".to_string())
    } else {
        None
    }
}

/// The Router Agent's result: a decision plus an append-only debug trace
/// of what happened during this one routing call. The trace is for
/// observability only and never drives control flow.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoutingOutcome {
    pub decision: RoutingDecision,
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoutingDecision {
    NeedMoreData {
        missing: Vec<String>,
        reasoning: String,
    },
    Predictions(PredictionBundle),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PredictionBundle {
    pub predictions: Vec<PredictionRecord>,
    pub report: Option<String>,
    pub follow_up_questions: Vec<String>,
    pub reasoning: String,
}

/// Intermediate routing plan, before any tool is invoked.
#[derive(Debug)]
enum RoutePlan {
    Invoke {
        models: Vec<String>,
        reasoning: String,
    },
    NeedData {
        missing: Vec<String>,
        reasoning: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct NeedDataHint;

pub struct RouterAgent {
    chat: Arc<dyn ChatClient>,
    predictions: Arc<dyn PredictionClient>,
    reports: Arc<dyn ReportClient>,
    provider: String,
    model: String,
    specs: ModelSpecs,
}

impl RouterAgent {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        predictions: Arc<dyn PredictionClient>,
        reports: Arc<dyn ReportClient>,
        llm: &LLMConfig,
        specs: ModelSpecs,
    ) -> Self {
        Self {
            chat,
            predictions,
            reports,
            provider: llm.provider.clone(),
            model: llm.model.clone(),
            specs,
        }
    }

    /// One routing attempt per call, no retries. Never fails outward.
    pub async fn route(&self, payload: &Payload) -> RoutingOutcome {
        let mut trace = Vec::new();
        let params = payload.normalized_params();
        trace.push(format!(
            "available parameters: [{}]",
            params.keys().cloned().collect::<Vec<_>>().join(", ")
        ));
        info!(param_count = params.len(), "Router agent starting");

        let plan = match self.llm_route(payload, &params, &mut trace).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "Routing LLM call failed, using rule-based fallback");
                trace.push(format!("llm routing failed ({}), using rule-based matching", e));
                self.fallback_plan(&params, &mut trace)
            }
        };

        match plan {
            RoutePlan::NeedData { missing, reasoning } => {
                info!(missing = ?missing, "Router agent requesting more data");
                RoutingOutcome {
                    decision: RoutingDecision::NeedMoreData { missing, reasoning },
                    trace,
                }
            }
            RoutePlan::Invoke { models, reasoning } => {
                self.invoke_and_report(payload, &params, models, reasoning, trace)
                    .await
            }
        }
    }

    /// LLM-backed routing attempt. A transport error propagates so the
    /// caller can switch to the rule-based fallback; a malformed reply is
    /// handled here with keyword rules.
    async fn llm_route(
        &self,
        payload: &Payload,
        params: &Map<String, Value>,
        trace: &mut Vec<String>,
    ) -> AppResult<RoutePlan> {
        let request = LLMRequest {
            provider: self.provider.clone(),
            model: self.model.clone(),
            messages: vec![LLMMessage::user(self.create_routing_prompt(payload, params))],
            max_tokens: Some(1024),
            temperature: Some(0.2),
            system_instruction: Some(self.create_system_prompt()),
        };

        let response = self.chat.create_chat_completion(&request).await?;
        trace.push("llm routing reply received".to_string());

        let rules = [("need_data", NeedDataHint), ("missing", NeedDataHint)];
        let plan = match extract_with_rules(&response.content, &rules) {
            Extraction::Object(map) => {
                let reasoning = string_field(&map, "reasoning")
                    .unwrap_or_else(|| "No reasoning provided.".to_string());
                let decision = string_field(&map, "decision").unwrap_or_default().to_lowercase();

                if decision.contains("need") {
                    let mut missing = string_list_field(&map, "missing_critical");
                    if missing.is_empty() {
                        missing = self.missing_for_model("cardiovascular_risk", params);
                        trace.push("missing_critical was empty, recomputed from spec".to_string());
                    }
                    RoutePlan::NeedData { missing, reasoning }
                } else {
                    let mut models = Vec::new();
                    for name in string_list_field(&map, "models_to_invoke") {
                        match self.normalize_against_specs(&name) {
                            Some(id) if !models.contains(&id) => {
                                trace.push(format!("model '{}' normalized to {}", name, id));
                                models.push(id);
                            }
                            Some(_) => {} // duplicate after normalization
                            None => {
                                trace.push(format!("unrecognized model name '{}', dropped", name));
                            }
                        }
                    }
                    if models.is_empty() {
                        trace.push(
                            "no usable model names in reply, defaulting to cardiovascular_risk"
                                .to_string(),
                        );
                        models.push("cardiovascular_risk".to_string());
                    }
                    RoutePlan::Invoke { models, reasoning }
                }
            }
            Extraction::Keyword(NeedDataHint) => {
                trace.push("routing reply was prose, keyword indicated missing data".to_string());
                RoutePlan::NeedData {
                    missing: self.missing_for_model("cardiovascular_risk", params),
                    reasoning: "Reply was not valid JSON but indicated missing data.".to_string(),
                }
            }
            Extraction::Unparseable => {
                trace.push("routing reply unparseable, defaulting to cardiovascular_risk".to_string());
                RoutePlan::Invoke {
                    models: vec!["cardiovascular_risk".to_string()],
                    reasoning: "Could not interpret the routing reply; defaulting to the cardiovascular model."
                        .to_string(),
                }
            }
        };

        Ok(plan)
    }

    /// Deterministic routing when no LLM is reachable: invoke every model
    /// whose required parameter set is fully satisfied; if none is, report
    /// the missing list of the closest model.
    fn fallback_plan(&self, params: &Map<String, Value>, trace: &mut Vec<String>) -> RoutePlan {
        let mut satisfied = Vec::new();
        let mut closest: Option<(String, Vec<String>)> = None;

        for (id, spec) in self.specs.iter() {
            let missing: Vec<String> = spec
                .required_parameters
                .iter()
                .filter(|p| !params.contains_key(*p))
                .cloned()
                .collect();
            if missing.is_empty() {
                trace.push(format!("{}: all required parameters present", id));
                satisfied.push(id.clone());
            } else {
                trace.push(format!(
                    "{}: missing {} parameter(s) [{}]",
                    id,
                    missing.len(),
                    missing.join(", ")
                ));
                let is_closer = closest
                    .as_ref()
                    .map(|(_, m)| missing.len() < m.len())
                    .unwrap_or(true);
                if is_closer {
                    closest = Some((id.clone(), missing));
                }
            }
        }

        if !satisfied.is_empty() {
            RoutePlan::Invoke {
                models: satisfied,
                reasoning: "Rule-based routing: invoking every model whose required parameters are fully satisfied."
                    .to_string(),
            }
        } else if let Some((id, missing)) = closest {
            RoutePlan::NeedData {
                missing,
                reasoning: format!("Closest model ({}) is missing required parameters.", id),
            }
        } else {
            RoutePlan::NeedData {
                missing: Vec::new(),
                reasoning: "No prediction models are configured.".to_string(),
            }
        }
    }

    async fn invoke_and_report(
        &self,
        payload: &Payload,
        params: &Map<String, Value>,
        models: Vec<String>,
        reasoning: String,
        mut trace: Vec<String>,
    ) -> RoutingOutcome {
        let mut records = Vec::new();

        for model_id in &models {
            let Some(spec) = self.specs.get(model_id) else {
                trace.push(format!("unknown model {}, skipping", model_id));
                continue;
            };
            let filtered: Map<String, Value> = spec
                .required_parameters
                .iter()
                .filter_map(|p| params.get(p).map(|v| (p.clone(), v.clone())))
                .collect();

            match self.predictions.invoke(&spec.tool, &filtered).await {
                Ok(output) => {
                    info!(model = %model_id, "Prediction tool succeeded");
                    trace.push(format!("{} invoked successfully", model_id));
                    records.push(PredictionRecord {
                        model: model_id.clone(),
                        output,
                    });
                }
                Err(e) => {
                    // one failing model must not block the others
                    warn!(model = %model_id, error = %e, "Prediction tool failed");
                    trace.push(format!("invocation of {} failed: {}", model_id, e));
                }
            }
        }

        if records.is_empty() {
            // Distinguish "the service is down" from "we lack data": if the
            // cardiovascular model's parameters are all present, the failure
            // was an outage, not a data gap.
            let missing = self.missing_for_model("cardiovascular_risk", params);
            if missing.is_empty() {
                trace.push(
                    "all invocations failed despite complete parameters, treating as service outage"
                        .to_string(),
                );
                return RoutingOutcome {
                    decision: RoutingDecision::Predictions(PredictionBundle {
                        predictions: Vec::new(),
                        report: Some(
                            "The prediction services are currently unavailable. All required \
                             parameters were provided; please try again later."
                                .to_string(),
                        ),
                        follow_up_questions: Vec::new(),
                        reasoning,
                    }),
                    trace,
                };
            }
            trace.push(format!(
                "no predictions produced, missing parameters: [{}]",
                missing.join(", ")
            ));
            return RoutingOutcome {
                decision: RoutingDecision::NeedMoreData {
                    missing,
                    reasoning: "Required parameters are missing for risk prediction.".to_string(),
                },
                trace,
            };
        }

        let (report, follow_up_questions) = self.generate_report(payload, &records, &mut trace).await;

        RoutingOutcome {
            decision: RoutingDecision::Predictions(PredictionBundle {
                predictions: records,
                report: Some(report),
                follow_up_questions,
                reasoning,
            }),
            trace,
        }
    }

    /// Report step. Predictions are already in hand, so any failure here
    /// is replaced with a fixed placeholder rather than aborting.
    async fn generate_report(
        &self,
        payload: &Payload,
        records: &[PredictionRecord],
        trace: &mut Vec<String>,
    ) -> (String, Vec<String>) {
        let context = {
            let text = payload.free_text_context();
            if text.trim().is_empty() {
                "Patient risk assessment".to_string()
            } else {
                text
            }
        };

        match self.reports.generate_report(&context, records).await {
            Ok(reply) => match reply.get("content").and_then(|v| v.as_str()) {
                Some(content) => {
                    trace.push("report generated".to_string());
                    Self::parse_report_content(content)
                }
                None => {
                    trace.push("report reply had non-text content".to_string());
                    (REPORT_FAILED.to_string(), Vec::new())
                }
            },
            Err(e) => {
                warn!(error = %e, "Report generation failed");
                trace.push(format!("report generation failed: {}", e));
                (REPORT_FAILED.to_string(), Vec::new())
            }
        }
    }

    /// The report content is either plain text or a JSON string of shape
    /// `{report, follow_up_questions}`.
    fn parse_report_content(content: &str) -> (String, Vec<String>) {
        match extract_json_object(content) {
            Some(map) if map.contains_key("report") => {
                let report = string_field(&map, "report").unwrap_or_else(|| content.to_string());
                let follow_ups = string_list_field(&map, "follow_up_questions");
                (report, follow_ups)
            }
            _ => (content.to_string(), Vec::new()),
        }
    }

    fn missing_for_model(&self, model_id: &str, params: &Map<String, Value>) -> Vec<String> {
        self.specs
            .get(model_id)
            .map(|spec| {
                spec.required_parameters
                    .iter()
                    .filter(|p| !params.contains_key(*p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Normalize an LLM-proposed model name against the registry: known
    /// natural-language variants first, then a sanitized exact match for
    /// custom registries.
    fn normalize_against_specs(&self, name: &str) -> Option<String> {
        if let Some(id) = normalize_model_name(name) {
            if self.specs.contains(&id) {
                return Some(id);
            }
        }
        let sanitized = name.trim().to_lowercase().replace(' ', "_");
        if self.specs.contains(&sanitized) {
            return Some(sanitized);
        }
        None
    }

    fn create_system_prompt(&self) -> String {
        let model_descriptions = self
            .specs
            .iter()
            .map(|(id, spec)| {
                format!(
                    "- {}: {} (requires [{}])",
                    id,
                    spec.description,
                    spec.required_parameters.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You are the routing agent of a medical assistant. Choose which prediction model(s) to invoke given the available parameters and clinical context.

AVAILABLE PREDICTION MODELS:
{model_descriptions}

Only choose a model when its required parameters are available or nearly so.

OUTPUT FORMAT (respond with ONLY valid JSON):
{{
  "decision": "invoke" | "need_data",
  "models_to_invoke": ["model ids"],
  "missing_critical": ["parameter names"] or null,
  "reasoning": "one or two sentences explaining the choice"
}}"#,
        )
    }

    fn create_routing_prompt(&self, payload: &Payload, params: &Map<String, Value>) -> String {
        let context = {
            let text = payload.free_text_context();
            if text.trim().is_empty() {
                "(no narrative context provided)".to_string()
            } else {
                text
            }
        };
        let rendered = if params.is_empty() {
            "(none)".to_string()
        } else {
            params
                .iter()
                .map(|(k, v)| format!("- {}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"AVAILABLE PARAMETERS:
{rendered}

CLINICAL CONTEXT:
{context}

Decide which model(s) to invoke."#,
        )
    }
}
