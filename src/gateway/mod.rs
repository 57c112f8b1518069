//! # Model Gateway
//!
//! The only way the core talks to a language model. A gateway turns a
//! [`CompletionRequest`] into either final text or a batch of tool calls, and
//! normalizes every failure into a [`ProviderError`].
//!
//! Implementations:
//! - [`OpenAiCompatGateway`]: OpenAI-style chat completions with SSE streaming.
//!   Covers OpenAI, OpenRouter, Ollama and other compatible servers.
//! - [`AnthropicGateway`]: the native Anthropic Messages API.
//! - [`RetryingGateway`]: wraps any gateway and retries transient failures.
//!
//! [`ProviderRouter`] picks and configures the right one for a `provider/model` id.

use crate::error::ProviderError;
use crate::message::{Message, ToolCallRequest};
use crate::tools::ToolSpec;
use async_trait::async_trait;

pub mod anthropic;
pub mod openai_compat;
pub mod retry;
pub mod router;

pub use anthropic::AnthropicGateway;
pub use openai_compat::OpenAiCompatGateway;
pub use retry::RetryingGateway;
pub use router::ProviderRouter;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Provider-local model name, without the provider prefix.
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    Text(String),
    /// Tool calls, to be run in the given order. `content` is any text the
    /// model sent alongside them.
    ToolCalls {
        content: String,
        calls: Vec<ToolCallRequest>,
    },
}

/// Token counts a provider reported for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A finished completion. `usage` is `None` when the provider did not report it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub response: ModelResponse,
    pub usage: Option<Usage>,
}

impl From<ModelResponse> for Completion {
    fn from(response: ModelResponse) -> Self {
        Self {
            response,
            usage: None,
        }
    }
}

/// Callback for streamed text fragments.
pub type TextSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Name for logs and messages.
    fn name(&self) -> &str;

    /// Runs one completion. Text is passed to `on_text` as it arrives, when the
    /// transport supports streaming, and is also part of the returned response.
    async fn complete(
        &self,
        request: &CompletionRequest,
        on_text: TextSink<'_>,
    ) -> Result<Completion, ProviderError>;
}

/// Builds the response from the accumulated text and calls.
pub(crate) fn into_response(content: String, calls: Vec<ToolCallRequest>) -> ModelResponse {
    if calls.is_empty() {
        ModelResponse::Text(content)
    } else {
        ModelResponse::ToolCalls { content, calls }
    }
}
