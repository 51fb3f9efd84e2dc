//! Anthropic Messages API agent
//!
//! Each work item becomes one single-turn request; there is no system prompt
//! and no conversation history.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::agent::client::{Agent, AgentError, ChatRequest, ChatResponse};

/// Anthropic API endpoint
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Environment variable holding the API key
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Default model to use
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default max tokens
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for the Anthropic agent
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub model: String,
    pub max_tokens: u32,
    pub api_url: String,
    pub api_key_env: String,
    /// HTTP-level timeout; the batch processor applies its own per-attempt deadline on top
    pub timeout: Duration,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            api_url: ANTHROPIC_API_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl AnthropicConfig {
    /// Create a new config with a specific model
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// Agent backed by the Anthropic Messages API
pub struct AnthropicAgent {
    client: Client,
    api_key: String,
    config: AnthropicConfig,
}

impl AnthropicAgent {
    /// Create a new agent, reading the API key from `config.api_key_env`
    pub fn new(config: AnthropicConfig) -> Result<Self, AgentError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AgentError::MissingApiKey {
                env_var: config.api_key_env.clone(),
            })?;

        Self::with_api_key(api_key, config)
    }

    /// Create an agent with an explicit API key
    pub fn with_api_key(api_key: String, config: AnthropicConfig) -> Result<Self, AgentError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    /// Build the request body for the Messages API
    fn build_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "user", "content": request.message }
            ]
        });

        if let Some(conversation_id) = &request.conversation_id {
            body["metadata"] = json!({ "user_id": conversation_id });
        }

        body
    }

    /// Parse the API response into a ChatResponse
    fn parse_body(body: &Value) -> Result<ChatResponse, AgentError> {
        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| AgentError::InvalidResponse("missing content array".to_string()))?;

        let text = blocks
            .iter()
            .filter(|block| block["type"].as_str() == Some("text"))
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let tokens_used = body
            .get("usage")
            .map(|u| u["input_tokens"].as_u64().unwrap_or(0) + u["output_tokens"].as_u64().unwrap_or(0))
            .unwrap_or(0);

        Ok(ChatResponse { text, tokens_used })
    }
}

#[async_trait]
impl Agent for AnthropicAgent {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AgentError> {
        let body = self.build_body(&request);

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        // Handle rate limiting
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(AgentError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        // Handle other errors
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await?;
        Self::parse_body(&body)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for AnthropicAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAgent")
            .field("model", &self.config.model)
            .field("max_tokens", &self.config.max_tokens)
            .field("api_url", &self.config.api_url)
            .finish()
    }
}
