//! Core agent types and trait definitions

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Stateless agent - each call is independent (no conversation memory)
#[async_trait]
pub trait Agent: Send + Sync {
    /// Single chat request (resolves once the full response is available)
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AgentError>;

    /// Human-readable name for logs and summaries
    fn name(&self) -> &str;
}

/// One request to the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Free-text message (the work item's prompt)
    pub message: String,

    /// Optional conversation identifier, passed through untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    /// Create a request with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
        }
    }

    /// Attach a conversation identifier
    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

/// Response from the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated text
    pub text: String,

    /// Tokens consumed by this call (input + output)
    pub tokens_used: u64,
}

impl ChatResponse {
    pub fn new(text: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            text: text.into(),
            tokens_used,
        }
    }
}

/// Errors that can occur during agent calls
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Provider-suggested wait before the next attempt, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AgentError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Rough token estimation (actual tokenization varies)
/// ~4 characters per token on average for English text
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}
