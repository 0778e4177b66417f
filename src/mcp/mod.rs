//! Model Context Protocol (MCP) tool servers.
//!
//! Servers are spawned as child processes and spoken to over stdio. The
//! [`registry::ConnectionRegistry`] owns their transports; on every chat turn
//! [`registry::ConnectionRegistry::build_tool_set`] queries the connected
//! servers and returns a fresh [`tools::ToolSet`].
//!
//! # Descriptor
//!
//! Server lists can be imported from the descriptor format shared with
//! other MCP hosts:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "time": {
//!       "command": "npx",
//!       "args": ["-y", "@mcpcentral/mcp-time"]
//!     },
//!     "fs": {
//!       "command": "mcp-fs",
//!       "env": { "ROOT": "${HOME}/notes" }
//!     }
//!   }
//! }
//! ```
//!
//! # Tool Namespacing
//!
//! Tools are namespaced by server display name: `server_name__tool_name`
//! (e.g., `time__now`, `fs__read_file`).

pub mod config;
pub mod registry;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::ServerConfig;
pub use registry::{ConnectionRegistry, ConnectionState, ConnectionStatus};
pub use tools::{ToolDescriptor, ToolSet};
pub use transport::{ChildProcessFactory, McpTransport, TransportFactory};
