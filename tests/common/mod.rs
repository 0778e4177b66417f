//! Shared fixtures: a scripted OpenAI-compatible upstream and an in-process
//! MCP transport factory.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use mcp_chat_core::error::McpError;
use mcp_chat_core::mcp::types::McpTool;
use mcp_chat_core::mcp::{ConnectionRegistry, McpTransport, ServerConfig, TransportFactory};
use mcp_chat_core::settings::{AppSettings, InMemoryStore, McpSettings, ProviderSettings};
use mcp_chat_core::AppState;

pub const TOOL_BODY: &str = "Hello \n__TOOL_START__:svc__search\n\n__TOOL_END__:svc__search\ndone";

/// How the fake model answers.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// "Hello ", a `svc__search` call, then "done" once the result comes back.
    ToolRoundTrip,
    /// Same as `ToolRoundTrip`, but the call is closed with `finish_reason: "stop"`.
    ToolThenStop,
    /// A single text reply.
    Plain(&'static str),
    /// 401 with an OpenAI-style error body.
    Reject,
    /// Sends "partial" and then stalls.
    Stall,
}

#[derive(Clone)]
struct Upstream {
    script: Script,
    requests: Arc<Mutex<Vec<Value>>>,
}

#[derive(Debug)]
pub struct FakeUpstream {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeUpstream {
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

fn frame(v: &Value) -> String {
    format!("data: {v}\n\n")
}

fn text_frame(text: &str) -> String {
    frame(&json!({"choices": [{"delta": {"content": text}}]}))
}

fn sse(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn completions(State(up): State<Upstream>, Json(body): Json<Value>) -> Response {
    let saw_tool_result = body["messages"]
        .as_array()
        .is_some_and(|msgs| msgs.iter().any(|m| m["role"] == "tool"));
    up.requests.lock().unwrap().push(body);

    match up.script {
        Script::ToolRoundTrip | Script::ToolThenStop if saw_tool_result => {
            let mut out = text_frame("done");
            out.push_str(&frame(&json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})));
            out.push_str("data: [DONE]\n\n");
            sse(out)
        }
        Script::ToolRoundTrip | Script::ToolThenStop => {
            let finish = if matches!(up.script, Script::ToolThenStop) {
                "stop"
            } else {
                "tool_calls"
            };
            let mut out = text_frame("Hello ");
            out.push_str(&frame(&json!({"choices": [{"delta": {"tool_calls": [{
                "index": 0,
                "id": "call_1",
                "type": "function",
                "function": {"name": "svc__search", "arguments": "{\"q\":"}
            }]}}]})));
            out.push_str(&frame(&json!({"choices": [{"delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": "\"rust\"}"}
            }]}}]})));
            out.push_str(&frame(&json!({"choices": [{"delta": {}, "finish_reason": finish}]})));
            out.push_str("data: [DONE]\n\n");
            sse(out)
        }
        Script::Plain(text) => {
            let mut out = text_frame(text);
            out.push_str("data: [DONE]\n\n");
            sse(out)
        }
        Script::Reject => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Incorrect API key provided"}})),
        )
            .into_response(),
        Script::Stall => {
            let stream = async_stream::stream! {
                yield Ok::<_, std::convert::Infallible>(text_frame("partial"));
                tokio::time::sleep(Duration::from_secs(30)).await;
                yield Ok("data: [DONE]\n\n".to_string());
            };
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(stream),
            )
                .into_response()
        }
    }
}

pub async fn spawn_upstream(script: Script) -> FakeUpstream {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(Upstream {
            script,
            requests: Arc::clone(&requests),
        });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeUpstream {
        base_url: format!("http://{addr}/v1"),
        requests,
    }
}

/// Exposes one `search` tool that echoes its query.
pub struct SearchTransport;

#[async_trait]
impl McpTransport for SearchTransport {
    async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        Ok(vec![McpTool {
            name: "search".to_string(),
            description: Some("Search the index".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {"q": {"type": "string"}}
            }),
        }])
    }

    async fn call_tool(
        &self,
        _name: &str,
        arguments: serde_json::Map<String, Value>,
    ) -> Result<Value, McpError> {
        let q = arguments.get("q").and_then(Value::as_str).unwrap_or_default();
        Ok(json!({"content": [{"type": "text", "text": format!("results for {q}")}]}))
    }

    async fn close(&self) -> Result<(), McpError> {
        Ok(())
    }
}

/// Connects every config to a [`SearchTransport`].
pub struct SearchFactory;

#[async_trait]
impl TransportFactory for SearchFactory {
    async fn connect(&self, _config: &ServerConfig) -> Result<Arc<dyn McpTransport>, McpError> {
        Ok(Arc::new(SearchTransport))
    }
}

pub fn server_config(id: &str) -> ServerConfig {
    ServerConfig {
        id: id.to_string(),
        name: id.to_string(),
        command: "unused".to_string(),
        args: Vec::new(),
        env: HashMap::new(),
        enabled: true,
    }
}

/// Settings pointing at `base_url` with a key and one `svc` server.
pub fn configured_settings(base_url: &str) -> AppSettings {
    AppSettings {
        openai: ProviderSettings {
            api_key: "sk-test".to_string(),
            base_url: base_url.to_string(),
            ..ProviderSettings::default()
        },
        mcp: McpSettings {
            servers: vec![server_config("svc")],
            config_path: String::new(),
        },
        ..AppSettings::default()
    }
}

/// App state over an in-memory store, with the stored servers connected.
pub async fn app_state(settings: AppSettings) -> AppState {
    let servers = settings.mcp.servers.clone();
    let registry = Arc::new(ConnectionRegistry::new(Arc::new(SearchFactory)));
    registry.initialize(&servers).await;
    AppState::new(registry, Arc::new(InMemoryStore::new(settings)))
}
