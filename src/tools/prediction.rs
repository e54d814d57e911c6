//! Prediction Tool Client
//!
//! The disease-risk models (XGBoost + SHAP explainers) run as a separate
//! HTTP service. This client invokes one named tool with a filtered
//! parameter map and hands back the raw response fields. No validation is
//! performed beyond existence checks: a malformed response is a soft
//! failure for that one model, reported as an error the Router Agent
//! catches without aborting its siblings.

use crate::types::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// One model's raw prediction output, e.g. `prediction`,
/// `risk_probability`, `explanations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub model: String,
    pub output: Map<String, Value>,
}

impl PredictionRecord {
    pub fn risk_probability(&self) -> Option<f64> {
        self.output.get("risk_probability").and_then(|v| v.as_f64())
    }
}

#[async_trait]
pub trait PredictionClient: Send + Sync {
    /// Invoke a prediction tool by name with the given parameters.
    async fn invoke(&self, tool: &str, params: &Map<String, Value>) -> AppResult<Map<String, Value>>;
}

pub struct HttpPredictionClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    tool: &'a str,
    params: &'a Map<String, Value>,
}

impl HttpPredictionClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PredictionClient for HttpPredictionClient {
    async fn invoke(&self, tool: &str, params: &Map<String, Value>) -> AppResult<Map<String, Value>> {
        let response = self
            .client
            .post(format!("{}/invoke", self.base_url))
            .json(&InvokeRequest { tool, params })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Prediction(format!(
                "tool {} failed with status {}: {}",
                tool, status, detail
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Prediction(format!("tool {} returned invalid JSON: {}", tool, e)))?;

        let Value::Object(map) = body else {
            return Err(AppError::Prediction(format!(
                "tool {} returned a non-object response",
                tool
            )));
        };

        if let Some(error) = map.get("error").and_then(|v| v.as_str()) {
            let message = map
                .get("message")
                .or_else(|| map.get("details"))
                .and_then(|v| v.as_str())
                .unwrap_or(error);
            return Err(AppError::Prediction(format!("tool {}: {}", tool, message)));
        }

        if !map.contains_key("prediction") {
            return Err(AppError::Prediction(format!(
                "tool {} response missing prediction field",
                tool
            )));
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Map<String, Value> {
        let mut p = Map::new();
        p.insert("age".to_string(), json!(55));
        p
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/invoke")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"prediction": 1, "risk_probability": 0.81}"#)
            .create_async()
            .await;

        let client = HttpPredictionClient::new(&server.url(), 5).unwrap();
        let output = client
            .invoke("Predict_Cardiovascular_Risk_With_Explanation", &params())
            .await
            .unwrap();

        assert_eq!(output.get("prediction"), Some(&json!(1)));
        assert_eq!(output.get("risk_probability"), Some(&json!(0.81)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invoke_error_field_is_soft_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/invoke")
            .with_status(200)
            .with_body(r#"{"error": "model_unavailable", "message": "encoder not loaded"}"#)
            .create_async()
            .await;

        let client = HttpPredictionClient::new(&server.url(), 5).unwrap();
        let err = client.invoke("Predict_Diabetes_Risk_With_Explanation", &params()).await;
        assert!(matches!(err, Err(AppError::Prediction(msg)) if msg.contains("encoder not loaded")));
    }

    #[tokio::test]
    async fn test_invoke_missing_prediction_is_soft_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/invoke")
            .with_status(200)
            .with_body(r#"{"status": "ok"}"#)
            .create_async()
            .await;

        let client = HttpPredictionClient::new(&server.url(), 5).unwrap();
        let err = client.invoke("Predict_Cardiovascular_Risk_With_Explanation", &params()).await;
        assert!(matches!(err, Err(AppError::Prediction(msg)) if msg.contains("missing prediction")));
    }
}
