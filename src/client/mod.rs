//! Consumer-side chat client.
//!
//! [`ChatClient`] drives one chat turn at a time against the `/api/chat`
//! endpoint, demultiplexing the streamed body with [`parser`] into an
//! assistant message whose text and tool statuses update as bytes arrive.
//!
//! # Turn states
//!
//! `idle → submitted → streaming → ready`, or `→ error` when the request
//! fails. [`ChatClient::stop`] moves a submitted or streaming turn straight
//! to `ready`; bytes that arrive after the stop are discarded.
//!
//! ```rust,no_run
//! use mcp_chat_core::client::ChatClient;
//!
//! # async fn example() -> Result<(), mcp_chat_core::error::ClientError> {
//! let client = ChatClient::new("http://127.0.0.1:3000/api/chat")?;
//! if let Some(reply) = client.send_message("What time is it?").await? {
//!     println!("{}", reply.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod parser;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ClientError;
use crate::session::{ChatMessage, ChatRole};

pub use parser::{ParsedStream, parse_complete_text, parse_stream_text};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    #[default]
    Idle,
    Submitted,
    Streaming,
    Ready,
    Error,
}

#[derive(Debug, Default)]
struct TurnState {
    status: ChatStatus,
    messages: Vec<ChatMessage>,
    error: Option<String>,
    cancel: Option<CancellationToken>,
}

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    endpoint: Url,
    model: Option<String>,
    session_id: Option<String>,
    state: Mutex<TurnState>,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}

/// A chat conversation bound to one endpoint. Cheap to clone; clones share
/// the conversation.
#[derive(Debug, Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

impl ChatClient {
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self, ClientError> {
        Self::with_client(endpoint, reqwest::Client::new())
    }

    /// Create a client with a custom reqwest client.
    pub fn with_client(endpoint: impl AsRef<str>, http: reqwest::Client) -> Result<Self, ClientError> {
        let endpoint = Url::parse(endpoint.as_ref())?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                endpoint,
                model: None,
                session_id: None,
                state: Mutex::new(TurnState::default()),
            }),
        })
    }

    /// Ask for a specific model instead of the server's default.
    #[must_use]
    pub fn with_model(self, model: impl Into<String>) -> Self {
        self.rebuild(|inner| inner.model = Some(model.into()))
    }

    /// Tag requests with a conversation id.
    #[must_use]
    pub fn with_session_id(self, id: impl Into<String>) -> Self {
        self.rebuild(|inner| inner.session_id = Some(id.into()))
    }

    /// Seed the conversation, e.g. from a saved session.
    #[must_use]
    pub fn with_messages(self, messages: Vec<ChatMessage>) -> Self {
        self.lock().messages = messages;
        self
    }

    fn rebuild(self, edit: impl FnOnce(&mut Inner)) -> Self {
        let state = std::mem::take(&mut *self.lock());
        let mut inner = Inner {
            http: self.inner.http.clone(),
            endpoint: self.inner.endpoint.clone(),
            model: self.inner.model.clone(),
            session_id: self.inner.session_id.clone(),
            state: Mutex::new(state),
        };
        edit(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TurnState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> ChatStatus {
        self.lock().status
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    /// Message of the last failed turn, cleared when a new turn starts.
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Cancel the in-flight turn, if any, and move to `ready`.
    pub fn stop(&self) {
        let mut state = self.lock();
        if let Some(token) = state.cancel.take() {
            token.cancel();
            state.status = ChatStatus::Ready;
        }
    }

    /// Send a user message and stream the assistant's reply.
    ///
    /// Resolves to the final assistant message, or `None` when the turn was
    /// stopped before the response started.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
    ) -> Result<Option<ChatMessage>, ClientError> {
        let token = CancellationToken::new();
        let history = {
            let mut state = self.lock();
            if let Some(previous) = state.cancel.replace(token.clone()) {
                previous.cancel();
            }
            state.status = ChatStatus::Submitted;
            state.error = None;
            state.messages.push(ChatMessage::user(content));
            state.messages.clone()
        };

        let body = ChatRequestBody {
            messages: &history,
            model: self.inner.model.as_deref(),
            id: self.inner.session_id.as_deref(),
        };
        let request = self
            .inner
            .http
            .post(self.inner.endpoint.clone())
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(None),
            res = request => match res {
                Ok(r) => r,
                Err(e) => return Err(self.fail(&token, e.into())),
            },
        };

        let status = response.status();
        if !status.is_success() {
            let fallback = format!(
                "API error: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string();
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(ToString::to_string))
                .unwrap_or(fallback);
            let err = ClientError::Api {
                status: status.as_u16(),
                message,
            };
            return Err(self.fail(&token, err));
        }

        let mut assistant = ChatMessage {
            tool_calls: Some(Vec::new()),
            ..ChatMessage::new(ChatRole::Assistant, "")
        };
        {
            let mut state = self.lock();
            if token.is_cancelled() {
                return Ok(None);
            }
            state.messages.push(assistant.clone());
            state.status = ChatStatus::Streaming;
        }

        let body = response.bytes_stream();
        futures::pin_mut!(body);
        let mut raw = String::new();
        let mut pending: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                biased;
                () = token.cancelled() => break,
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    pending.extend_from_slice(&bytes);
                    decode_utf8(&mut pending, &mut raw);
                    self.apply(&token, &mut assistant, &parse_stream_text(&raw));
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Chat stream read failed");
                    break;
                }
                None => break,
            }
        }

        if !pending.is_empty() {
            raw.push_str(&String::from_utf8_lossy(&pending));
        }
        let finished = parse_complete_text(&raw);
        {
            let mut state = self.lock();
            assistant.content = finished.display_text.trim().to_string();
            assistant.tool_calls = Some(finished.tool_calls);
            if let Some(slot) = state.messages.iter_mut().find(|m| m.id == assistant.id) {
                *slot = assistant.clone();
            }
            if !token.is_cancelled() {
                state.status = ChatStatus::Ready;
                state.cancel = None;
            }
        }

        Ok(Some(assistant))
    }

    /// Push a parse of the body so far into the assistant placeholder.
    fn apply(&self, token: &CancellationToken, assistant: &mut ChatMessage, parsed: &ParsedStream) {
        let mut state = self.lock();
        if token.is_cancelled() {
            return;
        }
        assistant.content = parsed.display_text.trim().to_string();
        assistant.tool_calls = Some(parsed.tool_calls.clone());
        if let Some(slot) = state.messages.iter_mut().find(|m| m.id == assistant.id) {
            *slot = assistant.clone();
        }
    }

    fn fail(&self, token: &CancellationToken, err: ClientError) -> ClientError {
        let mut state = self.lock();
        if !token.is_cancelled() {
            tracing::error!(error = %err, "Chat request failed");
            state.status = ChatStatus::Error;
            state.error = Some(err.to_string());
            state.cancel = None;
        }
        err
    }
}

/// Move the decodable prefix of `pending` into `out`, keeping an incomplete
/// trailing sequence for the next chunk.
fn decode_utf8(pending: &mut Vec<u8>, out: &mut String) {
    loop {
        match std::str::from_utf8(pending) {
            Ok(s) => {
                out.push_str(s);
                pending.clear();
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                    None => {
                        pending.drain(..valid);
                        return;
                    }
                }
            }
        }
    }
}
