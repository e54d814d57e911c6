//! Report Generation Client
//!
//! Wraps the external MedGemma service that turns textual context plus
//! structured predictions into a narrative report with follow-up
//! questions. The reply's `content` field may be plain text or a JSON
//! string of shape `{report, follow_up_questions}`; interpreting it is
//! the Router Agent's business, this client only guarantees the field
//! exists.

use crate::tools::prediction::PredictionRecord;
use crate::types::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

#[async_trait]
pub trait ReportClient: Send + Sync {
    async fn generate_report(
        &self,
        context: &str,
        predictions: &[PredictionRecord],
    ) -> AppResult<Map<String, Value>>;
}

pub struct HttpReportClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct ReportRequest<'a> {
    context: &'a str,
    predictions: &'a [PredictionRecord],
}

impl HttpReportClient {
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
impl ReportClient for HttpReportClient {
    async fn generate_report(
        &self,
        context: &str,
        predictions: &[PredictionRecord],
    ) -> AppResult<Map<String, Value>> {
        let response = self
            .client
            .post(format!("{}/generate_report", self.base_url))
            .json(&ReportRequest {
                context,
                predictions,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Report(format!(
                "report generation failed with status {}: {}",
                status, detail
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Report(format!("report service returned invalid JSON: {}", e)))?;

        let Value::Object(map) = body else {
            return Err(AppError::Report(
                "report service returned a non-object response".to_string(),
            ));
        };

        if !map.contains_key("content") {
            return Err(AppError::Report(
                "report response missing content field".to_string(),
            ));
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_generate_report_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/generate_report")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content": "Patient shows elevated cardiovascular risk."}"#)
            .create_async()
            .await;

        let client = HttpReportClient::new(&server.url(), 5).unwrap();
        let predictions = vec![PredictionRecord {
            model: "cardiovascular_risk".to_string(),
            output: Map::new(),
        }];
        let reply = client.generate_report("context", &predictions).await.unwrap();
        assert_eq!(
            reply.get("content"),
            Some(&json!("Patient shows elevated cardiovascular risk."))
        );
    }

    #[tokio::test]
    async fn test_generate_report_missing_content() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/generate_report")
            .with_status(200)
            .with_body(r#"{"status": "ok"}"#)
            .create_async()
            .await;

        let client = HttpReportClient::new(&server.url(), 5).unwrap();
        let err = client.generate_report("context", &[]).await;
        assert!(matches!(err, Err(AppError::Report(msg)) if msg.contains("content")));
    }
}
