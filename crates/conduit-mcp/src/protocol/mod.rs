//! MCP Protocol Layer
//!
//! The pure (I/O-free) half of the client:
//! - JSON-RPC 2.0 message types and inbound classification
//! - MCP method-body builders
//! - Capability maps and the protocol-version table
//! - The error taxonomy

pub mod capabilities;
pub mod error;
pub mod messages;
pub mod methods;

pub use capabilities::{
    ClientCapabilities, ClientInfo, InitializeResult, ServerCapabilities, ServerInfo,
    LATEST_PROTOCOL_VERSION, PROTOCOL_VERSIONS,
};
pub use error::{codes, McpError, McpResult, RpcError};
pub use messages::{
    classify, decode, IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId, JSONRPC_VERSION,
};
pub use methods::MethodCall;
