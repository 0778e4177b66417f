//! Normalized streaming events and the plain-text marker encoding.
//!
//! The orchestrator emits [`NormalizedEvent`]s regardless of how the upstream
//! provider frames its stream. [`marker_stream`] flattens them into the chat
//! response body: assistant text verbatim, with tool lifecycle markers on
//! their own lines.
//!
//! ```rust
//! use mcp_chat_core::normalized::{NormalizedEvent, encode_event};
//!
//! let start = NormalizedEvent::ToolCallComplete {
//!     call_index: 0,
//!     id: "call_1".to_string(),
//!     name: "svc__search".to_string(),
//!     arguments_json: "{}".to_string(),
//! };
//! assert_eq!(
//!     encode_event(&start).as_deref(),
//!     Some("\n__TOOL_START__:svc__search\n")
//! );
//! ```

use std::convert::Infallible;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// Prefix of the line announcing that a tool started executing.
pub const TOOL_START_PREFIX: &str = "__TOOL_START__:";
/// Prefix of the line announcing that a tool finished.
pub const TOOL_END_PREFIX: &str = "__TOOL_END__:";

/// Normalized streaming events emitted by the LLM orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum NormalizedEvent {
    /// Indicates the start of a new streaming response.
    #[serde(rename = "stream.start")]
    StreamStart {
        /// Unique identifier for this request/response pair.
        request_id: String,
    },

    /// Incremental text delta from the assistant's response.
    #[serde(rename = "message.delta")]
    MessageDelta { text: String },

    /// Incremental reasoning delta (chain-of-thought output).
    #[serde(rename = "reasoning.delta")]
    ReasoningDelta { text: String },

    /// Incremental tool call delta (streaming tool call assembly).
    #[serde(rename = "tool_call.delta")]
    ToolCallDelta {
        /// Index of this tool call in the current batch.
        call_index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Incremental arguments JSON fragment.
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments_delta: Option<String>,
    },

    /// Tool call is fully assembled and about to be executed.
    #[serde(rename = "tool_call.complete")]
    ToolCallComplete {
        call_index: usize,
        id: String,
        name: String,
        arguments_json: String,
    },

    /// Result from executing a tool.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// Tool call ID this result corresponds to.
        id: String,
        name: String,
        content: String,
        /// Whether the tool execution succeeded.
        success: bool,
    },

    /// An error occurred during streaming.
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream has completed successfully.
    #[serde(rename = "done")]
    Done,
}

/// Encode one event as response body text.
///
/// Only assistant text and the tool start/result events produce output;
/// everything else is `None`.
pub fn encode_event(evt: &NormalizedEvent) -> Option<String> {
    match evt {
        NormalizedEvent::MessageDelta { text } if !text.is_empty() => Some(text.clone()),
        NormalizedEvent::ToolCallComplete { name, .. } => {
            Some(format!("\n{TOOL_START_PREFIX}{name}\n"))
        }
        NormalizedEvent::ToolResult { name, .. } => Some(format!("\n{TOOL_END_PREFIX}{name}\n")),
        _ => None,
    }
}

/// Turn an event stream into the chunked text body of a chat response.
///
/// Chunks come out in event order, one per encoded event. The body ends on
/// `Done`, on an `Error` event (logged, never forwarded) or when the event
/// stream runs dry, so the response is always terminated cleanly.
pub fn marker_stream<S>(events: S) -> impl Stream<Item = Result<String, Infallible>> + Send
where
    S: Stream<Item = NormalizedEvent> + Send + 'static,
{
    async_stream::stream! {
        futures::pin_mut!(events);
        let mut request_id = String::new();

        while let Some(evt) = events.next().await {
            match &evt {
                NormalizedEvent::StreamStart { request_id: id } => {
                    request_id.clone_from(id);
                }
                NormalizedEvent::Error { message, code } => {
                    tracing::error!(
                        request_id = %request_id,
                        error = %message,
                        code = ?code,
                        "Chat stream failed; closing response"
                    );
                    break;
                }
                NormalizedEvent::Done => break,
                _ => {}
            }

            if let Some(chunk) = encode_event(&evt) {
                yield Ok(chunk);
            }
        }

        tracing::debug!(request_id = %request_id, "Chat stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_start(name: &str) -> NormalizedEvent {
        NormalizedEvent::ToolCallComplete {
            call_index: 0,
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments_json: "{}".to_string(),
        }
    }

    fn tool_result(name: &str) -> NormalizedEvent {
        NormalizedEvent::ToolResult {
            id: "call_1".to_string(),
            name: name.to_string(),
            content: "ok".to_string(),
            success: true,
        }
    }

    fn text(t: &str) -> NormalizedEvent {
        NormalizedEvent::MessageDelta {
            text: t.to_string(),
        }
    }

    async fn collect(events: Vec<NormalizedEvent>) -> String {
        marker_stream(futures::stream::iter(events))
            .map(|r| match r {
                Ok(s) => s,
                Err(never) => match never {},
            })
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    #[tokio::test]
    async fn text_and_tool_markers_are_interleaved_in_order() {
        let body = collect(vec![
            NormalizedEvent::StreamStart {
                request_id: "r1".to_string(),
            },
            text("Hello "),
            tool_start("svc__search"),
            tool_result("svc__search"),
            text("done"),
            NormalizedEvent::Done,
        ])
        .await;

        assert_eq!(
            body,
            "Hello \n__TOOL_START__:svc__search\n\n__TOOL_END__:svc__search\ndone"
        );
    }

    #[tokio::test]
    async fn non_output_events_are_ignored() {
        let body = collect(vec![
            NormalizedEvent::ReasoningDelta {
                text: "thinking".to_string(),
            },
            NormalizedEvent::ToolCallDelta {
                call_index: 0,
                id: None,
                name: Some("x".to_string()),
                arguments_delta: Some("{".to_string()),
            },
            text("visible"),
        ])
        .await;
        assert_eq!(body, "visible");
    }

    #[tokio::test]
    async fn error_event_ends_the_body_without_leaking() {
        let body = collect(vec![
            text("partial"),
            NormalizedEvent::Error {
                message: "upstream reset".to_string(),
                code: None,
            },
            text("never sent"),
        ])
        .await;
        assert_eq!(body, "partial");
    }

    #[tokio::test]
    async fn nothing_after_done_is_emitted() {
        let body = collect(vec![text("a"), NormalizedEvent::Done, text("b")]).await;
        assert_eq!(body, "a");
    }

    #[test]
    fn event_tags_round_trip() {
        let json = serde_json::to_value(text("hi")).unwrap();
        assert_eq!(json["type"], "message.delta");
        assert_eq!(json["data"]["text"], "hi");
    }
}
