//! LLM driver trait and the OpenAI-compatible implementation.
//!
//! The [`LlmDriver`] trait defines the core streaming interface. The
//! [`Orchestrator`] builds on top of a driver to run the tool loop against
//! an aggregated [`ToolSet`](crate::mcp::ToolSet).
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_chat_core::llm::{LlmSettings, Orchestrator};
//!
//! let settings = LlmSettings {
//!     base_url: "https://api.openai.com/v1".to_string(),
//!     api_key: Some("sk-...".to_string()),
//!     model: "gpt-4o".to_string(),
//! };
//! let orchestrator = Orchestrator::new(settings, tools, http);
//! let events = orchestrator.chat_with_history(messages).await?;
//! ```

pub mod chat_completions;
pub mod orchestrator;

pub use chat_completions::ChatCompletionsDriver;
pub use orchestrator::Orchestrator;

use crate::normalized::NormalizedEvent;
use futures::Stream;

/// LLM connection and model settings for one request.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL of the OpenAI-compatible API (e.g., `https://api.openai.com/v1`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4o`).
    pub model: String,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .finish()
    }
}

/// Strip trailing slashes and a trailing `/chat/completions` or `/responses`
/// endpoint suffix, so users may paste either a base URL or a full endpoint.
pub fn normalize_base_url(raw: &str) -> String {
    let mut url = raw.trim().trim_end_matches('/');
    for suffix in ["/chat/completions", "/responses"] {
        if let Some(stripped) = url.strip_suffix(suffix) {
            url = stripped.trim_end_matches('/');
        }
    }
    url.to_string()
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Text content; `None` for assistant turns that only call tools.
    pub content: Option<String>,
    /// Optional tool call ID (for tool responses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Optional tool calls made by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
    /// Tool response.
    Tool,
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call.
    pub id: String,
    /// Type of tool (always "function" for now).
    #[serde(rename = "type")]
    pub call_type: String,
    /// Function details.
    pub function: ToolCallFunction,
}

/// Function details in a tool call.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallFunction {
    /// Function name.
    pub name: String,
    /// Arguments as JSON string.
    pub arguments: String,
}

/// Request to an LLM driver.
#[derive(Debug)]
pub struct LlmRequest {
    /// Conversation messages.
    pub messages: Vec<serde_json::Value>,
    /// Available tools in `OpenAI` function schema format.
    pub tools: Vec<serde_json::Value>,
}

/// Boxed stream of driver events.
pub type EventStream =
    std::pin::Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>;

/// Trait for LLM streaming drivers.
///
/// Implementations of this trait provide streaming access to LLM responses,
/// emitting [`NormalizedEvent`]s as the model generates output.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Stream a response from the LLM.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the provider answers with a
    /// non-success status. Failures after the stream opened arrive as stream
    /// items instead.
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream>;
}
