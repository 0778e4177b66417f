//! MCP chat core
//!
//! The server half of a desktop chat client: it proxies conversations to an
//! OpenAI-compatible endpoint and lets the model call tools exposed by
//! locally spawned Model Context Protocol servers.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP server streaming one text body per chat turn
//! - **MCP**: connection registry and tool aggregation over child-process transports
//! - **LLM Orchestration**: Chat Completions driver with a bounded tool loop
//! - **Client**: consumer-side turn state machine and marker parser
//!
//! # Modules
//!
//! - [`client`]: Chat turn client and stream demultiplexing
//! - [`config`]: Layered service configuration
//! - [`llm`]: LLM driver traits and implementations
//! - [`mcp`]: MCP connections, descriptors and tool aggregation
//! - [`normalized`]: Unified streaming event model and marker encoding
//! - [`server`]: HTTP routes
//! - [`session`]: Chat messages and saved sessions
//! - [`settings`]: Settings store collaborator

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]

pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod normalized;
pub mod server;
pub mod session;
pub mod settings;

pub use server::AppState;
