//! LLM orchestrator with tool loop execution.
//!
//! The orchestrator manages the complete lifecycle of one chat turn:
//! 1. Send the conversation to the LLM
//! 2. Stream the response, detecting tool calls
//! 3. Execute tool calls through the aggregated [`ToolSet`]
//! 4. Feed tool results back to the LLM
//! 5. Repeat until the model produces a final response
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_chat_core::llm::{LlmSettings, Orchestrator};
//!
//! let tools = registry.build_tool_set().await;
//! let orchestrator = Orchestrator::new(settings, tools, http);
//! let events = orchestrator.chat_with_history(messages).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::mcp::ToolSet;
use crate::normalized::NormalizedEvent;

use super::{
    ChatCompletionsDriver, EventStream, LlmDriver, LlmRequest, LlmSettings, Message, MessageRole,
    ToolCall, ToolCallFunction,
};

/// Maximum number of model steps per turn.
const MAX_TOOL_ITERATIONS: usize = 10;

/// Accumulated state for a streaming tool call.
#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// LLM orchestrator with tool loop execution.
///
/// The orchestrator wraps an [`LlmDriver`] and adds:
/// - Tool call detection and accumulation
/// - Tool execution through the turn's [`ToolSet`]
/// - Automatic tool result feeding
/// - Request ID tracking
#[derive(Clone)]
pub struct Orchestrator {
    driver: Arc<dyn LlmDriver>,
    tools: ToolSet,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tool_count", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator talking to an OpenAI-compatible endpoint.
    pub fn new(settings: LlmSettings, tools: ToolSet, http: reqwest::Client) -> Self {
        Self::with_driver(Arc::new(ChatCompletionsDriver::new(settings, http)), tools)
    }

    pub fn with_driver(driver: Arc<dyn LlmDriver>, tools: ToolSet) -> Self {
        Self { driver, tools }
    }

    /// Start a chat interaction with existing message history.
    ///
    /// The first model request is made before this returns, so credential
    /// and connectivity failures surface as `Err` rather than inside the
    /// stream. The stream then yields:
    /// - `StreamStart` with a unique request ID
    /// - `MessageDelta` for assistant text
    /// - `ToolCallDelta` and `ToolCallComplete` for tool calls
    /// - `ToolResult` after tool execution
    /// - `Done` when complete, or `Error` if the turn fails mid-flight
    #[allow(clippy::too_many_lines)]
    pub async fn chat_with_history(
        &self,
        messages: Vec<Message>,
    ) -> anyhow::Result<impl Stream<Item = NormalizedEvent> + Send + 'static> {
        let request_id = Uuid::new_v4().to_string();
        let tools = self.tools.openai_tools_json();

        tracing::info!(
            request_id = %request_id,
            message_count = messages.len(),
            tool_count = tools.len(),
            "Starting orchestrator chat"
        );

        let mut message_json: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or_default())
            .collect();

        let first: EventStream = self
            .driver
            .stream(LlmRequest {
                messages: message_json.clone(),
                tools: tools.clone(),
            })
            .await
            .inspect_err(|e| {
                tracing::error!(request_id = %request_id, error = %e, "Failed to create driver stream");
            })?;

        let orchestrator = self.clone();

        let stream = async_stream::stream! {
            yield NormalizedEvent::StreamStart {
                request_id: request_id.clone(),
            };

            let mut pending = Some(first);
            let mut iteration = 0;

            loop {
                if iteration >= MAX_TOOL_ITERATIONS {
                    tracing::error!(
                        request_id = %request_id,
                        iteration = iteration,
                        max_iterations = MAX_TOOL_ITERATIONS,
                        "Maximum tool loop iterations exceeded"
                    );
                    yield NormalizedEvent::Error {
                        message: "Maximum tool loop iterations exceeded".to_string(),
                        code: Some("MAX_ITERATIONS".to_string()),
                    };
                    break;
                }
                iteration += 1;

                tracing::info!(
                    request_id = %request_id,
                    iteration = iteration,
                    message_count = message_json.len(),
                    "Starting tool loop iteration"
                );

                let driver_stream = match pending.take() {
                    Some(s) => s,
                    None => {
                        let req = LlmRequest {
                            messages: message_json.clone(),
                            tools: tools.clone(),
                        };
                        match orchestrator.driver.stream(req).await {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::error!(
                                    request_id = %request_id,
                                    iteration = iteration,
                                    error = %e,
                                    "Failed to create driver stream"
                                );
                                yield NormalizedEvent::Error {
                                    message: e.to_string(),
                                    code: None,
                                };
                                break;
                            }
                        }
                    }
                };

                let mut tool_accumulators: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
                let mut assistant_text = String::new();
                let mut has_tool_calls = false;

                futures::pin_mut!(driver_stream);

                while let Some(result) = driver_stream.next().await {
                    match result {
                        Ok(event) => {
                            match &event {
                                NormalizedEvent::MessageDelta { text } => {
                                    assistant_text.push_str(text);
                                }
                                NormalizedEvent::ToolCallDelta {
                                    call_index,
                                    id,
                                    name,
                                    arguments_delta,
                                } => {
                                    has_tool_calls = true;
                                    let acc = tool_accumulators.entry(*call_index).or_default();
                                    if acc.id.is_none() {
                                        acc.id.clone_from(id);
                                    }
                                    if acc.name.is_none() {
                                        acc.name.clone_from(name);
                                    }
                                    if let Some(delta) = arguments_delta {
                                        acc.arguments.push_str(delta);
                                    }
                                }
                                NormalizedEvent::ToolCallComplete { .. } => {
                                    has_tool_calls = true;
                                }
                                NormalizedEvent::Done => {
                                    // Don't yield Done yet if we have tool calls to process
                                    if !has_tool_calls {
                                        yield event;
                                        return;
                                    }
                                    continue;
                                }
                                NormalizedEvent::Error { .. } => {
                                    yield event;
                                    return;
                                }
                                _ => {}
                            }
                            yield event;
                        }
                        Err(e) => {
                            tracing::error!(request_id = %request_id, error = %e, "Driver stream failed");
                            yield NormalizedEvent::Error {
                                message: e.to_string(),
                                code: None,
                            };
                            return;
                        }
                    }
                }

                if !has_tool_calls {
                    tracing::info!(
                        request_id = %request_id,
                        iteration = iteration,
                        "No tool calls to process, completing stream"
                    );
                    yield NormalizedEvent::Done;
                    break;
                }

                let tool_calls: Vec<ToolCall> = tool_accumulators
                    .values()
                    .filter_map(|acc| {
                        let id = acc.id.clone()?;
                        let name = acc.name.clone()?;
                        Some(ToolCall {
                            id,
                            call_type: "function".to_string(),
                            function: ToolCallFunction {
                                name,
                                arguments: acc.arguments.clone(),
                            },
                        })
                    })
                    .collect();

                if tool_calls.is_empty() {
                    tracing::warn!(
                        request_id = %request_id,
                        iteration = iteration,
                        "No valid tool calls built from accumulators"
                    );
                    yield NormalizedEvent::Done;
                    break;
                }

                let assistant_turn = Message {
                    role: MessageRole::Assistant,
                    content: (!assistant_text.is_empty()).then(|| assistant_text.clone()),
                    tool_call_id: None,
                    tool_calls: Some(tool_calls.clone()),
                };
                message_json.push(serde_json::to_value(&assistant_turn).unwrap_or_default());

                for tool_call in &tool_calls {
                    let tool_name = &tool_call.function.name;
                    let arguments: serde_json::Value = serde_json::from_str(&tool_call.function.arguments)
                        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

                    tracing::info!(
                        request_id = %request_id,
                        iteration = iteration,
                        tool_id = %tool_call.id,
                        tool_name = %tool_name,
                        "Executing tool call"
                    );

                    let (content, success) = match orchestrator.tools.call(tool_name, arguments).await {
                        Ok(text) => {
                            tracing::info!(
                                request_id = %request_id,
                                tool_id = %tool_call.id,
                                tool_name = %tool_name,
                                result_length = text.len(),
                                "Tool call succeeded"
                            );
                            (text, true)
                        }
                        Err(e) => {
                            tracing::error!(
                                request_id = %request_id,
                                tool_id = %tool_call.id,
                                tool_name = %tool_name,
                                error = %e,
                                "Tool call failed"
                            );
                            (format!("Error: {e}"), false)
                        }
                    };

                    yield NormalizedEvent::ToolResult {
                        id: tool_call.id.clone(),
                        name: tool_name.clone(),
                        content: content.clone(),
                        success,
                    };

                    let tool_turn = Message {
                        role: MessageRole::Tool,
                        content: Some(content),
                        tool_call_id: Some(tool_call.id.clone()),
                        tool_calls: None,
                    };
                    message_json.push(serde_json::to_value(&tool_turn).unwrap_or_default());
                }
            }
        };

        Ok(stream)
    }
}
