//! Agent System
//!
//! This module contains the agents that power the medical assistant's
//! orchestration core:
//!
//! - **Parameter Extractor**: turns free-form patient text into structured fields
//! - **Main Agent**: decides to request data, route to models, or finish
//! - **Router Agent**: picks prediction models, invokes them, triggers the report
//!
//! ## Pipeline Overview
//!
//! ```text
//! Payload (patient text + structured fields)
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Parameter  │  → Populates structured parameters from text
//! │  Extractor  │
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │    Main     │  → need_more_data | route_to_models | complete
//! │    Agent    │
//! └─────────────┘
//!      │ (route)
//!      ▼
//! ┌─────────────┐
//! │   Router    │  → Prediction tools → report generation
//! │    Agent    │
//! └─────────────┘
//!      │
//!      ▼
//!  AssessmentOutcome
//! ```
//!
//! Each assessment runs strictly sequentially; every external failure is
//! converted into a well-formed outcome, never an error or a panic.

pub mod extractor;
pub mod main_agent;
pub mod router;

// Re-export main components
pub use extractor::ParameterExtractor;
pub use main_agent::{Decision, MainAgent};
pub use router::{PredictionBundle, RouterAgent, RoutingDecision, RoutingOutcome};

use crate::config::Config;
use crate::llm::provider::ChatClient;
use crate::payload::Payload;
use crate::tools::prediction::{PredictionClient, PredictionRecord};
use crate::tools::report::ReportClient;
use std::sync::Arc;
use tracing::{debug, info};

/// The only shapes an end user ever sees: a missing-data request or a
/// completed result. Total external-service unavailability still lands in
/// `Completed`, with an empty prediction list and an explanatory report.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssessmentOutcome {
    NeedMoreData {
        missing: Vec<String>,
        reasoning: String,
    },
    Completed {
        predictions: Vec<PredictionRecord>,
        report: Option<String>,
        follow_up_questions: Vec<String>,
        reasoning: String,
        trace: Vec<String>,
    },
}

/// Wires Parameter Extractor -> Main Agent -> Router Agent. All clients
/// are injected once at construction; one orchestration call is
/// request-scoped and shares no mutable state with concurrent calls.
pub struct Orchestrator {
    extractor: ParameterExtractor,
    main_agent: MainAgent,
    router: RouterAgent,
}

impl Orchestrator {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        predictions: Arc<dyn PredictionClient>,
        reports: Arc<dyn ReportClient>,
        config: &Config,
    ) -> Self {
        Self {
            extractor: ParameterExtractor::new(chat.clone(), &config.llm),
            main_agent: MainAgent::new(chat.clone(), &config.llm, config.model_specs.clone()),
            router: RouterAgent::new(
                chat,
                predictions,
                reports,
                &config.llm,
                config.model_specs.clone(),
            ),
        }
    }

    /// Run one full assessment for a payload. On `NeedMoreData` the caller
    /// re-invokes with an augmented payload; there is no loop here.
    pub async fn assess(&self, payload: Payload) -> AssessmentOutcome {
        let run_id = uuid::Uuid::new_v4();
        info!(run_id = %run_id, field_count = payload.len(), "Starting assessment");

        let payload = if payload
            .get_text("patient_text")
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
        {
            self.extractor.extract(&payload).await
        } else {
            payload
        };

        match self.main_agent.decide(&payload).await {
            Decision::NeedMoreData { missing, reasoning } => {
                info!(run_id = %run_id, missing = ?missing, "Assessment needs more data");
                AssessmentOutcome::NeedMoreData { missing, reasoning }
            }
            Decision::Complete => {
                info!(run_id = %run_id, "Assessment already complete");
                AssessmentOutcome::Completed {
                    predictions: Vec::new(),
                    report: None,
                    follow_up_questions: Vec::new(),
                    reasoning: "The main agent judged the assessment complete.".to_string(),
                    trace: Vec::new(),
                }
            }
            Decision::RouteToModels { models, reasoning } => {
                debug!(
                    run_id = %run_id,
                    suggested_models = ?models,
                    reasoning = %reasoning,
                    "Routing to prediction models"
                );
                let outcome = self.router.route(&payload).await;
                for line in &outcome.trace {
                    debug!(run_id = %run_id, "{}", line);
                }
                match outcome.decision {
                    RoutingDecision::NeedMoreData { missing, reasoning } => {
                        AssessmentOutcome::NeedMoreData { missing, reasoning }
                    }
                    RoutingDecision::Predictions(bundle) => {
                        info!(
                            run_id = %run_id,
                            prediction_count = bundle.predictions.len(),
                            "Assessment complete"
                        );
                        AssessmentOutcome::Completed {
                            predictions: bundle.predictions,
                            report: bundle.report,
                            follow_up_questions: bundle.follow_up_questions,
                            reasoning: bundle.reasoning,
                            trace: outcome.trace,
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared test doubles for the client traits.

    use crate::llm::provider::ChatClient;
    use crate::tools::prediction::{PredictionClient, PredictionRecord};
    use crate::tools::report::ReportClient;
    use crate::types::{AppError, AppResult, LLMRequest, LLMResponse, TokenUsage};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::Mutex;

    /// Chat client returning one fixed reply.
    pub struct StaticChatClient {
        reply: String,
    }

    impl StaticChatClient {
        pub fn new(reply: impl Into<String>) -> Self {
            Self {
                reply: reply.into(),
            }
        }
    }

    #[async_trait]
    impl ChatClient for StaticChatClient {
        async fn create_chat_completion(&self, _request: &LLMRequest) -> AppResult<LLMResponse> {
            Ok(LLMResponse {
                content: self.reply.clone(),
                finish_reason: "stop".to_string(),
                usage: TokenUsage::default(),
            })
        }
    }

    /// Chat client simulating a network/auth failure.
    pub struct FailingChatClient;

    #[async_trait]
    impl ChatClient for FailingChatClient {
        async fn create_chat_completion(&self, _request: &LLMRequest) -> AppResult<LLMResponse> {
            Err(AppError::LLMApi("connection refused".to_string()))
        }
    }

    /// Prediction client returning a fixed output and recording calls.
    pub struct StubPredictionClient {
        output: Value,
        calls: Mutex<Vec<(String, Map<String, Value>)>>,
    }

    impl StubPredictionClient {
        pub fn new(output: Value) -> Self {
            Self {
                output,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PredictionClient for StubPredictionClient {
        async fn invoke(
            &self,
            tool: &str,
            params: &Map<String, Value>,
        ) -> AppResult<Map<String, Value>> {
            self.calls
                .lock()
                .unwrap()
                .push((tool.to_string(), params.clone()));
            match &self.output {
                Value::Object(map) => Ok(map.clone()),
                other => {
                    let mut map = Map::new();
                    map.insert("prediction".to_string(), other.clone());
                    Ok(map)
                }
            }
        }
    }

    /// Prediction client where every invocation fails.
    pub struct FailingPredictionClient;

    #[async_trait]
    impl PredictionClient for FailingPredictionClient {
        async fn invoke(
            &self,
            tool: &str,
            _params: &Map<String, Value>,
        ) -> AppResult<Map<String, Value>> {
            Err(AppError::Prediction(format!("tool {} unreachable", tool)))
        }
    }

    /// Report client returning a fixed `content` value.
    pub struct StubReportClient {
        content: Value,
    }

    impl StubReportClient {
        pub fn new(content: Value) -> Self {
            Self { content }
        }
    }

    #[async_trait]
    impl ReportClient for StubReportClient {
        async fn generate_report(
            &self,
            _context: &str,
            _predictions: &[PredictionRecord],
        ) -> AppResult<Map<String, Value>> {
            let mut map = Map::new();
            map.insert("content".to_string(), self.content.clone());
            Ok(map)
        }
    }

    /// Report client that always fails.
    pub struct FailingReportClient;

    #[async_trait]
    impl ReportClient for FailingReportClient {
        async fn generate_report(
            &self,
            _context: &str,
            _predictions: &[PredictionRecord],
        ) -> AppResult<Map<String, Value>> {
            Err(AppError::Report("report service unreachable".to_string()))
        }
    }
}
