//! Offline agent for dry runs.

use async_trait::async_trait;

use crate::agent::client::{Agent, AgentError, ChatRequest, ChatResponse, estimate_tokens};

/// Answers every request with its own message.
///
/// Token usage is estimated from the text length, so a dry run still exercises
/// the token budget of the rate limiter.
#[derive(Debug, Clone, Default)]
pub struct EchoAgent;

impl EchoAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, AgentError> {
        // prompt in, same text out
        let tokens_used = estimate_tokens(&request.message) * 2;
        Ok(ChatResponse::new(request.message, tokens_used))
    }

    fn name(&self) -> &str {
        "echo"
    }
}
