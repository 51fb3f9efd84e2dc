//! Agent layer - the downstream request/response service a batch dispatches to
//!
//! This module provides:
//! - Agent trait for the chat abstraction
//! - AnthropicAgent implementation over HTTP
//! - EchoAgent for offline dry runs

pub mod anthropic;
pub mod client;
pub mod echo;

pub use anthropic::{AnthropicAgent, AnthropicConfig};
pub use client::{Agent, AgentError, ChatRequest, ChatResponse, estimate_tokens};
pub use echo::EchoAgent;
