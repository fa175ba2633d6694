//! Connection Configuration
//!
//! Builder-style configuration for a [`Connection`](crate::client::Connection):
//! which transport to use and how to decorate it, the client identity and
//! capability map sent during the handshake, request timeouts, and the
//! optional notification handler.

use std::sync::Arc;
use std::time::Duration;

use crate::client::NotificationHandler;
use crate::protocol::capabilities::{ClientCapabilities, ClientInfo};
use crate::protocol::error::McpResult;
use crate::transport::Transport;

#[cfg(feature = "http")]
use crate::transport::HttpTransportBuilder;
#[cfg(feature = "stdio")]
use crate::transport::{StdioConfig, StdioTransport};

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for the initialize handshake. Longer than the request
/// default because subprocess start-up may be slow.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Which wire transport a connection uses, plus its parameters.
#[derive(Clone)]
pub enum TransportConfig {
    /// Local subprocess speaking newline-delimited JSON
    #[cfg(feature = "stdio")]
    Stdio(StdioConfig),

    /// Remote endpoint speaking JSON or SSE over POST
    #[cfg(feature = "http")]
    Http {
        /// Endpoint URL
        url: String,
        /// Extra headers for every request
        headers: Vec<(String, String)>,
        /// Per-request HTTP timeout
        request_timeout: Duration,
    },
}

impl TransportConfig {
    /// Build the transport this configuration describes.
    pub fn build(&self) -> McpResult<Transport> {
        match self {
            #[cfg(feature = "stdio")]
            TransportConfig::Stdio(config) => {
                Ok(Transport::Stdio(StdioTransport::new(config.clone())))
            }
            #[cfg(feature = "http")]
            TransportConfig::Http {
                url,
                headers,
                request_timeout,
            } => {
                let transport = HttpTransportBuilder::new(url)
                    .with_headers(headers.iter().cloned())
                    .with_timeout(*request_timeout)
                    .build()?;
                Ok(Transport::Http(transport))
            }
        }
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "stdio")]
            TransportConfig::Stdio(config) => f.debug_tuple("Stdio").field(config).finish(),
            // Header values may carry credentials; show only the names.
            #[cfg(feature = "http")]
            TransportConfig::Http {
                url,
                headers,
                request_timeout,
            } => f
                .debug_struct("Http")
                .field("url", url)
                .field("headers", &headers.iter().map(|(k, _)| k).collect::<Vec<_>>())
                .field("request_timeout", request_timeout)
                .finish(),
        }
    }
}

/// Everything a [`Connection`](crate::client::Connection) needs to come up.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Transport selection and parameters
    pub transport: TransportConfig,

    /// Identity sent as `clientInfo` in the handshake
    pub client_info: ClientInfo,

    /// Capability map sent in the handshake
    pub capabilities: ClientCapabilities,

    /// Default per-request deadline
    pub timeout: Duration,

    /// Deadline for the initialize handshake
    pub init_timeout: Duration,

    /// Target for server notifications and for server requests beyond the
    /// auto-answered set
    pub handler: Option<Arc<dyn NotificationHandler>>,
}

impl ConnectionConfig {
    fn with_transport(transport: TransportConfig) -> Self {
        Self {
            transport,
            client_info: ClientInfo::default(),
            capabilities: ClientCapabilities::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            handler: None,
        }
    }

    /// Configure a stdio connection spawning `command`.
    #[cfg(feature = "stdio")]
    pub fn stdio(command: impl Into<String>) -> Self {
        Self::with_transport(TransportConfig::Stdio(StdioConfig::new(command)))
    }

    /// Configure an HTTP connection to `url`.
    #[cfg(feature = "http")]
    pub fn http(url: impl Into<String>) -> Self {
        Self::with_transport(TransportConfig::Http {
            url: url.into(),
            headers: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Add a subprocess argument (stdio only; ignored otherwise).
    #[cfg(feature = "stdio")]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        if let TransportConfig::Stdio(config) = &mut self.transport {
            config.args.push(arg.into());
        }
        self
    }

    /// Add several subprocess arguments (stdio only).
    #[cfg(feature = "stdio")]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let TransportConfig::Stdio(config) = &mut self.transport {
            config.args.extend(args.into_iter().map(|s| s.into()));
        }
        self
    }

    /// Set a subprocess environment variable (stdio only).
    #[cfg(feature = "stdio")]
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Stdio(config) = &mut self.transport {
            config.env.push((key.into(), value.into()));
        }
        self
    }

    /// Set the subprocess working directory (stdio only).
    #[cfg(feature = "stdio")]
    pub fn with_working_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        if let TransportConfig::Stdio(config) = &mut self.transport {
            config.working_dir = Some(dir.into());
        }
        self
    }

    /// Add an HTTP header (http only; ignored otherwise).
    #[cfg(feature = "http")]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Http { headers, .. } = &mut self.transport {
            headers.push((key.into(), value.into()));
        }
        self
    }

    /// Set the identity sent in the handshake.
    pub fn with_client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = info;
        self
    }

    /// Set the capability map sent in the handshake.
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the default per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the initialize-handshake deadline.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Install a handler for server notifications and requests.
    pub fn with_handler(mut self, handler: Arc<dyn NotificationHandler>) -> Self {
        self.handler = Some(handler);
        self
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("transport", &self.transport)
            .field("client_info", &self.client_info)
            .field("timeout", &self.timeout)
            .field("init_timeout", &self.init_timeout)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}
