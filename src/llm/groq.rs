use crate::llm::openai::OpenAICompatAdapter;
use crate::llm::provider::ChatClient;
use crate::types::{AppResult, LLMRequest, LLMResponse};
use async_trait::async_trait;

const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

pub struct GroqAdapter {
    inner: OpenAICompatAdapter,
}

impl GroqAdapter {
    pub fn new(api_key: &str, timeout_secs: u64) -> AppResult<Self> {
        Ok(Self {
            inner: OpenAICompatAdapter::new(api_key, Some(GROQ_API_BASE), timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatClient for GroqAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.inner.create_chat_completion(request).await
    }
}
