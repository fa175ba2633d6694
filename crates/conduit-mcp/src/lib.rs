//! # conduit-mcp
//!
//! An async client for the Model Context Protocol (MCP), the JSON-RPC
//! 2.0-based protocol for discovering and invoking tools, reading resources,
//! and fetching prompt templates from external MCP servers.
//!
//! ## Features
//!
//! - **Stdio transport**: spawn MCP servers as subprocesses and speak
//!   newline-delimited JSON over stdin/stdout
//! - **HTTP transport**: POST to remote servers with JSON or SSE response
//!   bodies and a sticky `mcp-session-id`
//! - **Concurrent requests**: per-request correlation by ID with individual
//!   timeouts; callers never queue behind each other
//! - **Connection pooling**: round-robin, random, or least-busy selection
//!   over any number of connections
//!
//! ## Example (stdio)
//!
//! ```rust,ignore
//! use conduit_mcp::{Connection, ConnectionConfig};
//!
//! let config = ConnectionConfig::stdio("npx")
//!     .with_args(["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]);
//! let conn = Connection::connect(config).await?;
//!
//! let tools = conn.list_tools(None).await?;
//! let result = conn
//!     .call_tool("read_file", Some(serde_json::json!({"path": "/tmp/test.txt"})))
//!     .await?;
//! ```
//!
//! ## Example (HTTP pool)
//!
//! ```rust,ignore
//! use conduit_mcp::{ConnectionConfig, Pool, Strategy};
//!
//! let config = ConnectionConfig::http("https://mcp.example.com/mcp")
//!     .with_header("Authorization", "Bearer token");
//! let pool = Pool::connect(4, config, Strategy::LeastBusy).await?;
//!
//! let conn = pool.checkout()?;
//! let resources = conn.list_resources(None).await?;
//! ```

#[cfg(not(any(feature = "stdio", feature = "http")))]
compile_error!("at least one transport feature (\"stdio\" or \"http\") must be enabled");

pub mod buffer;
pub mod client;
pub mod config;
pub mod pool;
pub mod protocol;
pub mod tracker;
pub mod transport;

pub use buffer::{BufferStats, MessageBuffer};
pub use client::{Connection, ConnectionStatus, NotificationHandler};
pub use config::{ConnectionConfig, TransportConfig};
pub use pool::{Pool, Strategy};
pub use protocol::{
    codes, ClientCapabilities, ClientInfo, McpError, McpResult, RpcError, ServerCapabilities,
    ServerInfo, LATEST_PROTOCOL_VERSION, PROTOCOL_VERSIONS,
};
pub use tracker::{RequestTracker, TrackerStats};
pub use transport::{CloseReason, Transport, TransportEvent};

#[cfg(feature = "http")]
pub use transport::{HttpTransport, HttpTransportBuilder};
#[cfg(feature = "stdio")]
pub use transport::{StdioConfig, StdioTransport};
