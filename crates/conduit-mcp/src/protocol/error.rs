//! MCP Error Types
//!
//! Every caller-facing fallible operation in this crate yields an [`McpError`].
//! Server-returned JSON-RPC errors are surfaced verbatim as [`RpcError`];
//! client-side failures map onto the canonical code table via
//! [`McpError::code`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Canonical JSON-RPC and MCP error codes.
pub mod codes {
    /// Parse error - invalid JSON was received
    pub const PARSE_ERROR: i64 = -32700;

    /// Invalid Request - the JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i64 = -32600;

    /// Method not found
    pub const METHOD_NOT_FOUND: i64 = -32601;

    /// Invalid params
    pub const INVALID_PARAMS: i64 = -32602;

    /// Internal error
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Transport ended with requests outstanding
    pub const CONNECTION_CLOSED: i64 = -32000;

    /// Per-request timer fired
    pub const REQUEST_TIMEOUT: i64 = -32001;

    /// Caller cancelled the request
    pub const REQUEST_CANCELLED: i64 = -32002;

    /// URI lookup failed
    pub const RESOURCE_NOT_FOUND: i64 = -32003;
}

/// JSON-RPC 2.0 error object.
///
/// Carried verbatim inside error responses in both directions: errors the
/// server returns to us surface to the caller unchanged, and errors we send
/// back for unsupported server requests use the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i64,

    /// Human-readable error message
    pub message: String,

    /// Optional additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error with an arbitrary code.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach additional data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Method-not-found (-32601).
    pub fn method_not_found(method: impl std::fmt::Display) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    /// Invalid params (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    /// Internal error (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    /// Resource-not-found (-32003).
    pub fn resource_not_found(uri: impl std::fmt::Display) -> Self {
        Self::new(codes::RESOURCE_NOT_FOUND, format!("Resource not found: {}", uri))
    }

    /// Whether the code is in the JSON-RPC standard range rather than the
    /// MCP-specific one.
    pub fn is_standard(&self) -> bool {
        (-32768..=-32600).contains(&self.code)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({})", data)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// MCP client error.
#[derive(Debug, Error)]
pub enum McpError {
    /// JSON-RPC error returned by the server, surfaced unchanged
    #[error("server error: {0}")]
    Rpc(#[from] RpcError),

    /// Undecodable inbound frame
    #[error("parse error: {0}")]
    Parse(String),

    /// Structurally bad JSON-RPC message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Transport ended while requests were outstanding
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Per-request timer fired
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// Transport-level fault (I/O, HTTP status, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// Subprocess could not be started
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// Operation attempted outside the `ready` state
    #[error("not ready, current={0}")]
    NotReady(String),

    /// Pool checkout found no live connections
    #[error("no connections available")]
    NoConnections,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        McpError::Transport(msg.into())
    }

    /// Create a spawn error.
    pub fn spawn(msg: impl Into<String>) -> Self {
        McpError::Spawn(msg.into())
    }

    /// Create an invalid-message error.
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        McpError::InvalidMessage(msg.into())
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        McpError::ConnectionClosed(reason.into())
    }

    /// The canonical error code for this error.
    ///
    /// Server errors keep the server's code; everything else maps onto the
    /// table in [`codes`].
    pub fn code(&self) -> i64 {
        match self {
            McpError::Rpc(e) => e.code,
            McpError::Parse(_) | McpError::Json(_) => codes::PARSE_ERROR,
            McpError::InvalidMessage(_) => codes::INVALID_REQUEST,
            McpError::ConnectionClosed(_)
            | McpError::Transport(_)
            | McpError::Spawn(_)
            | McpError::Io(_) => codes::CONNECTION_CLOSED,
            McpError::Timeout(_) => codes::REQUEST_TIMEOUT,
            McpError::Cancelled => codes::REQUEST_CANCELLED,
            McpError::NotReady(_) | McpError::NoConnections => codes::INTERNAL_ERROR,
        }
    }

    /// Whether a caller-side retry could plausibly succeed.
    ///
    /// True exactly for connection-closed and request-timeout; every other
    /// error surfaces to the caller as-is.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.code(),
            codes::CONNECTION_CLOSED | codes::REQUEST_TIMEOUT
        )
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout(_))
    }

    /// Check if this is a server-returned error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, McpError::Rpc(_))
    }
}

/// Result type alias for MCP operations.
pub type McpResult<T> = Result<T, McpError>;
