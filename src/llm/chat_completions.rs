//! OpenAI Chat Completions API driver.
//!
//! This module implements the [`LlmDriver`] trait for any OpenAI-compatible
//! `/chat/completions` endpoint, supporting streaming responses and tool calls.

use std::collections::BTreeMap;

use anyhow::Context;
use futures::StreamExt;

use crate::normalized::NormalizedEvent;

use super::{EventStream, LlmDriver, LlmRequest, LlmSettings, normalize_base_url};

/// Accumulated state for a streaming tool call.
#[derive(Default)]
struct ToolAccum {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// Driver for the OpenAI Chat Completions API.
///
/// Posts to `<base_url>/chat/completions` and streams responses as
/// [`NormalizedEvent`]s.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsDriver {
    /// Create a driver sharing the given HTTP client.
    #[must_use]
    pub fn new(settings: LlmSettings, http: reqwest::Client) -> Self {
        Self { http, settings }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", normalize_base_url(&self.settings.base_url))
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<EventStream> {
        let url = self.endpoint();

        let mut body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "messages": req.messages,
        });
        if !req.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(req.tools);
        }

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = self.settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            rb = rb.bearer_auth(k);
        }

        let resp = rb
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .map(ToString::to_string)
                })
                .unwrap_or(text);
            anyhow::bail!("provider returned {status}: {detail}");
        }

        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();
            let mut tool_accum: BTreeMap<usize, ToolAccum> = BTreeMap::new();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = find_frame_end(&buf) {
                    let frame = buf.drain(..pos).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        let line = line.trim();
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();

                        if data == "[DONE]" {
                            for event in drain_tool_calls(&mut tool_accum) {
                                yield event;
                            }
                            yield NormalizedEvent::Done;
                            continue;
                        }

                        let v: serde_json::Value = serde_json::from_str(data)?;
                        if let Some(msg) = v.pointer("/error/message").and_then(|m| m.as_str()) {
                            Err::<(), _>(anyhow::anyhow!("provider stream error: {msg}"))?;
                        }
                        let choice = &v["choices"][0];
                        let delta = &choice["delta"];

                        // Assistant text delta
                        if let Some(s) = delta.get("content").and_then(|x| x.as_str()) {
                            if !s.is_empty() {
                                yield NormalizedEvent::MessageDelta { text: s.to_string() };
                            }
                        }

                        if let Some(s) = delta.get("reasoning_content").and_then(|x| x.as_str()) {
                            if !s.is_empty() {
                                yield NormalizedEvent::ReasoningDelta { text: s.to_string() };
                            }
                        }

                        // Tool calls streaming deltas
                        if let Some(arr) = delta.get("tool_calls").and_then(|x| x.as_array()) {
                            for tc in arr {
                                let idx = tc.get("index").and_then(serde_json::Value::as_u64).unwrap_or(0) as usize;
                                let id = tc.get("id").and_then(|x| x.as_str()).map(ToString::to_string);
                                let name = tc.get("function")
                                    .and_then(|f| f.get("name"))
                                    .and_then(|x| x.as_str())
                                    .map(ToString::to_string);
                                let args_delta = tc.get("function")
                                    .and_then(|f| f.get("arguments"))
                                    .and_then(|x| x.as_str())
                                    .map(ToString::to_string);

                                let entry = tool_accum.entry(idx).or_default();
                                if entry.id.is_none() {
                                    entry.id.clone_from(&id);
                                }
                                if entry.name.is_none() {
                                    entry.name.clone_from(&name);
                                }
                                if let Some(ad) = &args_delta {
                                    entry.args.push_str(ad);
                                }

                                yield NormalizedEvent::ToolCallDelta {
                                    call_index: idx,
                                    id,
                                    name,
                                    arguments_delta: args_delta,
                                };
                            }
                        }

                        // Any finish reason closes the pending calls; some providers
                        // report "stop" after streaming tool_calls.
                        if choice.get("finish_reason").and_then(|x| x.as_str()).is_some() {
                            for event in drain_tool_calls(&mut tool_accum) {
                                yield event;
                            }
                        }
                    }
                }
            }

            // Stream ended without [DONE] or a finish reason.
            for event in drain_tool_calls(&mut tool_accum) {
                yield event;
            }
        };

        Ok(Box::pin(out))
    }
}

/// Turn every assembled call into a `ToolCallComplete`, leaving `accum` empty.
fn drain_tool_calls(accum: &mut BTreeMap<usize, ToolAccum>) -> Vec<NormalizedEvent> {
    std::mem::take(accum)
        .into_iter()
        .filter_map(|(idx, a)| {
            Some(NormalizedEvent::ToolCallComplete {
                call_index: idx,
                id: a.id?,
                name: a.name?,
                arguments_json: a.args,
            })
        })
        .collect()
}

/// Length of the first complete SSE frame in `buf`, including its blank-line
/// terminator (`\n\n` or `\r\n\r\n`).
fn find_frame_end(buf: &[u8]) -> Option<usize> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| p + 2);
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_end_at_blank_line() {
        assert_eq!(find_frame_end(b"data: {}\n\ndata: x"), Some(10));
        assert_eq!(find_frame_end(b"data: {}\r\n\r\n"), Some(12));
        assert_eq!(find_frame_end(b"data: {}\n"), None);
    }

    #[test]
    fn assembled_calls_drain_once() {
        let mut accum = BTreeMap::new();
        accum.insert(
            0,
            ToolAccum {
                id: Some("call_1".to_string()),
                name: Some("svc__search".to_string()),
                args: "{}".to_string(),
            },
        );
        accum.insert(1, ToolAccum::default());

        let events = drain_tool_calls(&mut accum);
        assert_eq!(
            events,
            vec![NormalizedEvent::ToolCallComplete {
                call_index: 0,
                id: "call_1".to_string(),
                name: "svc__search".to_string(),
                arguments_json: "{}".to_string(),
            }]
        );
        assert!(accum.is_empty());
        assert!(drain_tool_calls(&mut accum).is_empty());
    }

    #[test]
    fn endpoint_is_derived_from_normalized_base() {
        let driver = ChatCompletionsDriver::new(
            LlmSettings {
                base_url: "http://localhost:8080/v1/chat/completions/".to_string(),
                api_key: None,
                model: "m".to_string(),
            },
            reqwest::Client::new(),
        );
        assert_eq!(driver.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
