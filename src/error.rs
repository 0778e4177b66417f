//! Error types.
//!
//! Failures are contained where they happen: a connection error lands on the
//! connection record, a catalog or tool-call error degrades one server's
//! contribution, and only the primary request path (credentials, upstream
//! model) is surfaced to the caller as an [`ApiError`].

use std::time::Duration;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by MCP transports, the connection registry and tool execution.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process could not be started.
    #[error("failed to spawn MCP server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },

    /// The process started but the MCP initialize exchange failed.
    #[error("MCP handshake with '{server}' failed: {message}")]
    Handshake { server: String, message: String },

    /// The handshake did not finish within the configured connect timeout.
    #[error("MCP server '{server}' did not complete its handshake within {after:?}")]
    ConnectTimeout { server: String, after: Duration },

    /// The transport to the server has gone away.
    #[error("MCP transport to '{server}' is closed")]
    TransportClosed { server: String },

    /// A request on an established connection failed.
    #[error("MCP request to '{server}' failed: {message}")]
    Protocol { server: String, message: String },

    /// The model asked for a tool that is not in the aggregated set.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A server config descriptor could not be read or parsed.
    #[error("invalid MCP config descriptor '{path}': {message}")]
    Descriptor { path: String, message: String },
}

impl McpError {
    /// Whether this error means the server's transport is gone for good.
    #[must_use]
    pub fn is_transport_closed(&self) -> bool {
        matches!(self, Self::TransportClosed { .. })
    }
}

/// Errors raised by a [`SettingsStore`](crate::settings::SettingsStore).
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Error returned from HTTP handlers.
///
/// Every variant renders as `{ "error": "<message>" }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// The upstream model provider rejected or failed the request.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Invalid(msg) => Self::BadRequest(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Errors raised by the consumer-side [`ChatClient`](crate::client::ChatClient).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server answered with a non-success status.
    #[error("{message}")]
    Api { status: u16, message: String },
}
