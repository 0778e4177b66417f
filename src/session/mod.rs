//! Chat messages and persisted chat sessions.
//!
//! These are the shapes exchanged with the desktop shell: camelCase JSON,
//! stored verbatim by the [`SettingsStore`](crate::settings::SettingsStore).
//! The core never persists them on its own.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{Message, MessageRole};

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    /// Client-side annotation, never sent to the model.
    Data,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Running,
    Done,
}

/// Display status of one tool invocation within an assistant turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallInfo {
    pub tool_name: String,
    pub status: ToolCallStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default = "new_id")]
    pub id: String,
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallInfo>>,
}

impl ChatMessage {
    /// A message with a fresh id and no tool calls.
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// The model-facing form of this message.
    ///
    /// Only system, user and assistant messages are forwarded; `data` and
    /// `tool` messages are client-side records and yield `None`.
    #[must_use]
    pub fn to_llm_message(&self) -> Option<Message> {
        let role = match self.role {
            ChatRole::System => MessageRole::System,
            ChatRole::User => MessageRole::User,
            ChatRole::Assistant => MessageRole::Assistant,
            ChatRole::Data | ChatRole::Tool => return None,
        };
        Some(Message {
            role,
            content: Some(self.content.clone()),
            tool_call_id: None,
            tool_calls: None,
        })
    }
}

/// A persisted conversation. Missing fields are filled in on deserialize,
/// so a bare `{}` is a valid new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatSession {
    /// An empty session titled "New Chat".
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: new_id(),
            title: "New Chat".to_string(),
            created_at: Utc::now().to_rfc3339(),
            messages: Vec::new(),
        }
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}
