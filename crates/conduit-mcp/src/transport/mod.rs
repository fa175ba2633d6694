//! Transport Layer
//!
//! Two wire transports behind one closed variant:
//!
//! - **stdio**: spawns an MCP server subprocess and speaks newline-delimited
//!   JSON over its stdin/stdout
//! - **http**: POSTs each message to a remote endpoint and parses JSON or SSE
//!   response bodies
//!
//! A transport pushes [`TransportEvent`]s to its owning connection over an
//! mpsc channel: `Ready` once before anything else, `Message` per inbound
//! frame, `Error` for non-fatal trouble, and `Closed` exactly once, last.

#[cfg(feature = "stdio")]
pub mod stdio;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub(crate) mod sse;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::error::McpResult;

#[cfg(feature = "http")]
pub use http::{HttpTransport, HttpTransportBuilder};
#[cfg(feature = "stdio")]
pub use stdio::{StdioConfig, StdioTransport};

/// Why a transport stopped delivering events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean shutdown (subprocess exited 0, or an explicit close)
    Normal,
    /// Subprocess exited with a non-zero status
    ExitStatus(i32),
    /// The transport failed
    Error(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Normal => write!(f, "normal"),
            CloseReason::ExitStatus(code) => write!(f, "exit status {}", code),
            CloseReason::Error(reason) => write!(f, "{}", reason),
        }
    }
}

/// Asynchronous events a transport delivers to its owner.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport is usable; emitted once, before any other event.
    Ready,
    /// One inbound JSON object frame.
    Message(Value),
    /// A non-fatal problem (undecodable HTTP body, failed POST, ...).
    Error(String),
    /// The transport is done; emitted exactly once, last. Any frames still
    /// buffered at close are flushed as `Message` events beforehand.
    Closed(CloseReason),
}

/// Channel capacity for transport event delivery.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The two wire transports. The set is closed, so a tagged variant is used
/// instead of trait objects.
pub enum Transport {
    /// Subprocess stdin/stdout transport
    #[cfg(feature = "stdio")]
    Stdio(StdioTransport),
    /// HTTP POST transport
    #[cfg(feature = "http")]
    Http(HttpTransport),
}

impl Transport {
    /// Start the transport, delivering events to `events`.
    ///
    /// Readiness is signalled asynchronously via [`TransportEvent::Ready`].
    pub async fn start(&mut self, events: mpsc::Sender<TransportEvent>) -> McpResult<()> {
        match self {
            #[cfg(feature = "stdio")]
            Transport::Stdio(t) => t.start(events).await,
            #[cfg(feature = "http")]
            Transport::Http(t) => t.start(events).await,
        }
    }

    /// Hand one outbound message to the transport.
    ///
    /// Returns once the message is accepted for delivery; the actual wire
    /// write happens asynchronously.
    pub fn send(&self, message: Value) -> McpResult<()> {
        match self {
            #[cfg(feature = "stdio")]
            Transport::Stdio(t) => t.send(message),
            #[cfg(feature = "http")]
            Transport::Http(t) => t.send(message),
        }
    }

    /// Shut the transport down. Idempotent.
    pub async fn close(&self) {
        match self {
            #[cfg(feature = "stdio")]
            Transport::Stdio(t) => t.close().await,
            #[cfg(feature = "http")]
            Transport::Http(t) => t.close().await,
        }
    }

    /// Whether the transport can still carry messages.
    pub fn is_connected(&self) -> bool {
        match self {
            #[cfg(feature = "stdio")]
            Transport::Stdio(t) => t.is_connected(),
            #[cfg(feature = "http")]
            Transport::Http(t) => t.is_connected(),
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            #[cfg(feature = "stdio")]
            Transport::Stdio(_) => "stdio",
            #[cfg(feature = "http")]
            Transport::Http(_) => "http",
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").field("kind", &self.kind()).finish()
    }
}
