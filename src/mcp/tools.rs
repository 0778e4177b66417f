//! Tool aggregation across connected servers.
//!
//! Every call to [`ConnectionRegistry::build_tool_set`] queries the live
//! catalogs again, so a reconnect or a changed catalog shows up on the next
//! chat turn.
//!
//! [`ConnectionRegistry::build_tool_set`]: crate::mcp::ConnectionRegistry::build_tool_set

use std::{collections::BTreeMap, sync::Arc};

use futures::future::join_all;

use crate::error::McpError;
use crate::mcp::transport::McpTransport;
use crate::mcp::types::{McpTool, result_text};

/// Separator between server display name and raw tool name.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// A connected server as seen by the aggregator.
#[derive(Clone)]
pub struct ConnectedServer {
    pub id: String,
    pub name: String,
    pub transport: Arc<dyn McpTransport>,
}

impl std::fmt::Debug for ConnectedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedServer")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Forwards calls for one tool to the server that advertised it.
#[derive(Clone)]
pub struct ToolExecutor {
    server_name: String,
    tool_name: String,
    transport: Arc<dyn McpTransport>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("server_name", &self.server_name)
            .field("tool_name", &self.tool_name)
            .finish()
    }
}

impl ToolExecutor {
    /// Call the tool and reduce its result to text.
    pub async fn execute(&self, arguments: serde_json::Value) -> Result<String, McpError> {
        let arguments = match arguments {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(McpError::Protocol {
                    server: self.server_name.clone(),
                    message: format!("tool arguments must be a JSON object, got {other}"),
                });
            }
        };

        tracing::info!(
            server = %self.server_name,
            tool = %self.tool_name,
            "Calling MCP tool"
        );
        let result = self.transport.call_tool(&self.tool_name, arguments).await?;
        Ok(result_text(&result))
    }
}

/// One entry of the aggregated tool set.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// `<server display name>__<raw tool name>`.
    pub qualified_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub executor: ToolExecutor,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("qualified_name", &self.qualified_name)
            .field("executor", &self.executor)
            .finish()
    }
}

/// The callable tool set handed to the model for one turn.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolSet {
    /// Qualified key for a server's tool.
    #[must_use]
    pub fn qualified_name(server_name: &str, tool_name: &str) -> String {
        format!("{server_name}{NAMESPACE_SEPARATOR}{tool_name}")
    }

    /// Register a server's catalog. A key that already exists is replaced.
    pub fn extend_from_catalog(&mut self, server: &ConnectedServer, catalog: Vec<McpTool>) {
        for tool in catalog {
            let qualified_name = Self::qualified_name(&server.name, &tool.name);
            let description = tool
                .description
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| tool.name.clone());

            self.tools.insert(
                qualified_name.clone(),
                ToolDescriptor {
                    qualified_name,
                    description,
                    input_schema: tool.input_schema,
                    executor: ToolExecutor {
                        server_name: server.name.clone(),
                        tool_name: tool.name,
                        transport: Arc::clone(&server.transport),
                    },
                },
            );
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn get(&self, qualified_name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(qualified_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Execute a tool by its qualified name.
    pub async fn call(
        &self,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        let tool = self
            .get(qualified_name)
            .ok_or_else(|| McpError::UnknownTool(qualified_name.to_string()))?;
        tool.executor.execute(arguments).await
    }

    /// Tools in `OpenAI` function-calling format.
    pub fn openai_tools_json(&self) -> Vec<serde_json::Value> {
        self.tools
            .values()
            .map(|t| {
                let params = if t.input_schema.is_object() {
                    t.input_schema.clone()
                } else {
                    serde_json::json!({"type":"object","properties":{}})
                };

                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.qualified_name,
                        "description": t.description,
                        "parameters": params
                    }
                })
            })
            .collect()
    }
}

/// Fetch every server's catalog concurrently; results keep the input order.
pub async fn fetch_catalogs(
    servers: &[ConnectedServer],
) -> Vec<Result<Vec<McpTool>, McpError>> {
    join_all(servers.iter().map(|s| s.transport.list_tools())).await
}

/// Assemble a tool set from catalog results, skipping failed servers.
pub fn assemble(
    servers: &[ConnectedServer],
    catalogs: Vec<Result<Vec<McpTool>, McpError>>,
) -> ToolSet {
    let mut set = ToolSet::default();
    for (server, catalog) in servers.iter().zip(catalogs) {
        match catalog {
            Ok(tools) => {
                tracing::info!(
                    server = %server.name,
                    tool_count = tools.len(),
                    "Loaded MCP tools"
                );
                set.extend_from_catalog(server, tools);
            }
            Err(e) => {
                tracing::error!(
                    server = %server.name,
                    error = %e,
                    "Failed to list MCP tools"
                );
            }
        }
    }
    set
}

/// Build a fresh tool set from the given connected servers.
#[cfg(test)]
pub(crate) async fn build_tool_set(servers: &[ConnectedServer]) -> ToolSet {
    let catalogs = fetch_catalogs(servers).await;
    assemble(servers, catalogs)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process transports for tests.

    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct FakeTransport {
        pub tools: Vec<McpTool>,
        pub fail_listing: bool,
        pub closed_listing: bool,
        pub calls: Mutex<Vec<(String, serde_json::Value)>>,
        pub close_count: AtomicUsize,
    }

    impl FakeTransport {
        pub fn with_tools(names: &[&str]) -> Self {
            Self {
                tools: names
                    .iter()
                    .map(|n| McpTool {
                        name: (*n).to_string(),
                        description: Some(format!("{n} tool")),
                        input_schema: serde_json::json!({"type": "object"}),
                    })
                    .collect(),
                ..Self::default()
            }
        }

        pub fn closes(&self) -> usize {
            self.close_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl McpTransport for FakeTransport {
        async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
            if self.closed_listing {
                return Err(McpError::TransportClosed {
                    server: "fake".to_string(),
                });
            }
            if self.fail_listing {
                return Err(McpError::Protocol {
                    server: "fake".to_string(),
                    message: "tools/list exploded".to_string(),
                });
            }
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: serde_json::Map<String, serde_json::Value>,
        ) -> Result<serde_json::Value, McpError> {
            let arguments = serde_json::Value::Object(arguments);
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments.clone()));
            Ok(serde_json::json!({
                "content": [
                    { "type": "text", "text": format!("{name} ran") },
                    { "type": "text", "text": arguments.to_string() }
                ]
            }))
        }

        async fn close(&self) -> Result<(), McpError> {
            self.close_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub fn server(id: &str, name: &str, transport: Arc<FakeTransport>) -> ConnectedServer {
        ConnectedServer {
            id: id.to_string(),
            name: name.to_string(),
            transport,
        }
    }
}
