use async_trait::async_trait;
use crate::config::LLMConfig;
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse};

/// Chat-completion client contract shared by every agent. Concrete
/// providers (Groq, Gemini, any OpenAI-compatible endpoint) and test
/// doubles all implement this; agents receive it by injection and never
/// know which backend they are talking to.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

pub struct LLM {
    adapter: Box<dyn ChatClient>,
}

impl LLM {
    /// Select the adapter by provider name from the config.
    pub fn from_config(config: &LLMConfig) -> AppResult<Self> {
        let api_key = config.active_api_key().unwrap_or_default();
        let adapter: Box<dyn ChatClient> = match config.provider.as_str() {
            "groq" => Box::new(crate::llm::groq::GroqAdapter::new(
                &api_key,
                config.timeout_secs,
            )?),
            "gemini" => Box::new(crate::llm::gemini::GeminiAdapter::new(
                &api_key,
                config.timeout_secs,
            )?),
            // Any OpenAI-compatible endpoint, base URL from config
            "openai" | "openai-compatible" => {
                Box::new(crate::llm::openai::OpenAICompatAdapter::new(
                    &api_key,
                    config.api_base.as_deref(),
                    config.timeout_secs,
                )?)
            }
            other => {
                return Err(AppError::Config(format!(
                    "unsupported LLM provider: {}",
                    other
                )))
            }
        };

        Ok(Self { adapter })
    }
}

#[async_trait]
impl ChatClient for LLM {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }
}
