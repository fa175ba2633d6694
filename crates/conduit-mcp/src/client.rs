//! MCP Connection
//!
//! One [`Connection`] per peer. A connection owns its transport and request
//! tracker, drives the initialize handshake, and routes inbound frames:
//! responses resolve tracked waiters, server notifications go to the
//! configured handler in arrival order, and server requests are answered by
//! the connection itself (`ping`, `roots/list`, and a method-not-found
//! rejection for everything else - this client does not implement sampling).
//!
//! The state machine runs on its own task and reacts to one event at a time,
//! so connection state needs no locks; only the tracker's entry map is
//! shared with timer tasks.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::protocol::capabilities::{
    is_known_version, ClientCapabilities, ClientInfo, InitializeResult, ServerCapabilities,
    ServerInfo, LATEST_PROTOCOL_VERSION,
};
use crate::protocol::error::{McpError, McpResult, RpcError};
use crate::protocol::messages::{
    classify, IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use crate::protocol::methods::{self, MethodCall};
use crate::tracker::{RequestTracker, TrackerStats};
use crate::transport::{CloseReason, Transport, TransportEvent, EVENT_CHANNEL_CAPACITY};

/// Placeholder deadline while no handshake is in flight.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected (terminal once reached after a start)
    Disconnected,
    /// Transport is starting
    Connecting,
    /// Transport is up, initialize handshake in flight
    Initializing,
    /// Handshake complete; requests are accepted
    Ready,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Initializing => "initializing",
            ConnectionStatus::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Receives server notifications, and server requests beyond the
/// auto-answered set.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Called for every server notification, in arrival order.
    async fn handle_notification(&self, method: &str, params: Option<Value>);

    /// Optionally answer a server request before the built-in handling runs.
    ///
    /// Return `None` (the default) to fall through: `ping` and `roots/list`
    /// get their standard answers, everything else (including
    /// `sampling/createMessage`) is rejected with method-not-found.
    async fn handle_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Option<Result<Value, RpcError>> {
        let _ = (method, params);
        None
    }
}

/// What the server told us at handshake completion.
#[derive(Debug, Clone)]
struct ServerSession {
    info: ServerInfo,
    capabilities: ServerCapabilities,
    protocol_version: String,
    instructions: Option<String>,
}

struct ConnectionInner {
    transport: Transport,
    tracker: RequestTracker,
    status: watch::Sender<ConnectionStatus>,
    server: RwLock<Option<ServerSession>>,
    handshake_error: Mutex<Option<McpError>>,
    client_info: ClientInfo,
    capabilities: ClientCapabilities,
    default_timeout: Duration,
    init_timeout: Duration,
    handler: Option<Arc<dyn NotificationHandler>>,
}

/// A client connection to one MCP server.
///
/// Cheap to clone; all clones share the same underlying connection. Requests
/// may be issued concurrently from any number of tasks - correlation is by
/// ID, not by turn-taking.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connect and complete the MCP handshake.
    ///
    /// Builds the configured transport, starts it, and drives the state
    /// machine until the connection is `ready` (or the handshake fails,
    /// which is fatal).
    pub async fn connect(config: ConnectionConfig) -> McpResult<Self> {
        let mut transport = config.transport.build()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(ConnectionStatus::Connecting);

        transport.start(events_tx).await?;
        debug!(transport = transport.kind(), "transport started");

        let inner = Arc::new(ConnectionInner {
            transport,
            tracker: RequestTracker::new(),
            status: status_tx,
            server: RwLock::new(None),
            handshake_error: Mutex::new(None),
            client_info: config.client_info,
            capabilities: config.capabilities,
            default_timeout: config.timeout,
            init_timeout: config.init_timeout,
            handler: config.handler,
        });

        tokio::spawn(event_loop(Arc::clone(&inner), events_rx));

        let connection = Connection { inner };
        connection.wait_until_ready().await?;
        Ok(connection)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Whether two handles refer to the same underlying connection.
    pub fn same_connection(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the connection is ready and its transport still believes it
    /// can carry messages.
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Ready && self.inner.transport.is_connected()
    }

    /// Server identity recorded at handshake completion.
    pub fn server_info(&self) -> Option<ServerInfo> {
        read_lock(&self.inner.server).as_ref().map(|s| s.info.clone())
    }

    /// Server capability map recorded at handshake completion.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        read_lock(&self.inner.server)
            .as_ref()
            .map(|s| s.capabilities.clone())
    }

    /// Protocol version the server chose.
    pub fn protocol_version(&self) -> Option<String> {
        read_lock(&self.inner.server)
            .as_ref()
            .map(|s| s.protocol_version.clone())
    }

    /// Free-form server instructions, if any were sent.
    pub fn instructions(&self) -> Option<String> {
        read_lock(&self.inner.server)
            .as_ref()
            .and_then(|s| s.instructions.clone())
    }

    /// Requests currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.tracker.pending_count()
    }

    /// Tracker counter snapshot.
    pub fn tracker_stats(&self) -> TrackerStats {
        self.inner.tracker.stats()
    }

    /// Send a request and await its result, using the default timeout.
    ///
    /// The returned value is the server's `result` verbatim. Server errors
    /// surface with their exact code and message. Dropping the returned
    /// future cancels the request and sends a best-effort
    /// `notifications/cancelled` to the server.
    pub async fn request(&self, method: &str, params: Value) -> McpResult<Value> {
        self.request_with_timeout(method, params, self.inner.default_timeout)
            .await
    }

    /// Send a request with a per-call timeout override.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> McpResult<Value> {
        let status = self.status();
        if status != ConnectionStatus::Ready {
            return Err(McpError::NotReady(status.to_string()));
        }

        let id = self.inner.tracker.next_id();
        let (tx, rx) = oneshot::channel();
        self.inner.tracker.track(id, method, Some(tx), timeout);

        let request = JsonRpcRequest::new(id, method).with_params(params);
        if let Err(e) = send_message(&self.inner, &request) {
            self.inner.tracker.fail(id);
            return Err(e);
        }
        trace!(id, method = %method, "request submitted");

        let mut guard = CancelGuard {
            inner: &self.inner,
            id,
            armed: true,
        };
        let outcome = rx.await;
        guard.armed = false;

        match outcome {
            Ok(result) => result,
            // The tracker entry went away without delivering; the connection
            // is tearing down underneath us.
            Err(_) => Err(McpError::connection_closed("reply channel dropped")),
        }
    }

    /// Send a one-way notification.
    ///
    /// Returns as soon as the transport accepts the message for delivery.
    pub async fn notify(&self, method: &str, params: Value) -> McpResult<()> {
        let status = self.status();
        if status != ConnectionStatus::Ready {
            return Err(McpError::NotReady(status.to_string()));
        }
        let notification = JsonRpcNotification::new(method).with_params(params);
        send_message(&self.inner, &notification)
    }

    /// Disconnect and fail any outstanding requests. Terminal.
    pub async fn disconnect(&self) {
        debug!("disconnecting");
        self.inner.transport.close().await;

        // Wait for the event loop to observe the close so callers see a
        // settled state.
        let mut rx = self.inner.status.subscribe();
        loop {
            if *rx.borrow_and_update() == ConnectionStatus::Disconnected {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    // Wrapper operations. Each is a one-line builder over `request`; the
    // server's result value is returned verbatim.

    /// `ping`
    pub async fn ping(&self) -> McpResult<Value> {
        self.call(methods::ping()).await
    }

    /// `tools/list`
    pub async fn list_tools(&self, cursor: Option<&str>) -> McpResult<Value> {
        self.call(methods::tools_list(cursor)).await
    }

    /// `tools/call`
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        self.call(methods::tools_call(name, arguments)).await
    }

    /// `resources/list`
    pub async fn list_resources(&self, cursor: Option<&str>) -> McpResult<Value> {
        self.call(methods::resources_list(cursor)).await
    }

    /// `resources/templates/list`
    pub async fn list_resource_templates(&self, cursor: Option<&str>) -> McpResult<Value> {
        self.call(methods::resources_templates_list(cursor)).await
    }

    /// `resources/read`
    pub async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        self.call(methods::resources_read(uri)).await
    }

    /// `resources/subscribe`
    pub async fn subscribe_resource(&self, uri: &str) -> McpResult<Value> {
        self.call(methods::resources_subscribe(uri)).await
    }

    /// `resources/unsubscribe`
    pub async fn unsubscribe_resource(&self, uri: &str) -> McpResult<Value> {
        self.call(methods::resources_unsubscribe(uri)).await
    }

    /// `prompts/list`
    pub async fn list_prompts(&self, cursor: Option<&str>) -> McpResult<Value> {
        self.call(methods::prompts_list(cursor)).await
    }

    /// `prompts/get`
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        self.call(methods::prompts_get(name, arguments)).await
    }

    /// `logging/setLevel`
    pub async fn set_log_level(&self, level: &str) -> McpResult<Value> {
        self.call(methods::logging_set_level(level)).await
    }

    /// `completion/complete`
    pub async fn complete(&self, reference: Value, argument: Value) -> McpResult<Value> {
        self.call(methods::completion_complete(reference, argument))
            .await
    }

    /// `notifications/roots/list_changed`
    pub async fn notify_roots_list_changed(&self) -> McpResult<()> {
        let call = methods::roots_list_changed();
        self.notify(call.method, call.params).await
    }

    /// `notifications/progress`
    pub async fn notify_progress(
        &self,
        progress_token: Value,
        progress: f64,
        total: Option<f64>,
    ) -> McpResult<()> {
        let call = methods::progress(progress_token, progress, total);
        self.notify(call.method, call.params).await
    }

    async fn call(&self, call: MethodCall) -> McpResult<Value> {
        self.request(call.method, call.params).await
    }

    async fn wait_until_ready(&self) -> McpResult<()> {
        let mut rx = self.inner.status.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            match status {
                ConnectionStatus::Ready => return Ok(()),
                ConnectionStatus::Disconnected => return Err(self.take_handshake_error()),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(self.take_handshake_error());
            }
        }
    }

    fn take_handshake_error(&self) -> McpError {
        match self.inner.handshake_error.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
        .unwrap_or_else(|| McpError::connection_closed("connection failed during handshake"))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status().to_string())
            .field("transport", &self.inner.transport.kind())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Cancels the tracked request if the caller's future is dropped before a
/// reply arrives.
struct CancelGuard<'a> {
    inner: &'a ConnectionInner,
    id: u64,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.inner.tracker.cancel(self.id) {
            debug!(id = self.id, "request cancelled by caller");
            // Best-effort heads-up to the server; no acknowledgement waited.
            let call = methods::cancelled(self.id, None);
            let notification = JsonRpcNotification::new(call.method).with_params(call.params);
            if let Ok(value) = serde_json::to_value(&notification) {
                let _ = self.inner.transport.send(value);
            }
        }
    }
}

/// The per-connection state machine. Reacts to one transport event at a
/// time; breaks on `Closed`.
async fn event_loop(inner: Arc<ConnectionInner>, mut events: mpsc::Receiver<TransportEvent>) {
    let init_timer = tokio::time::sleep(FAR_FUTURE);
    tokio::pin!(init_timer);
    let mut awaiting_init = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Ready) => {
                    debug!("transport ready, starting handshake");
                    inner.status.send_replace(ConnectionStatus::Initializing);
                    match start_handshake(&inner) {
                        Ok(()) => {
                            init_timer
                                .as_mut()
                                .reset(tokio::time::Instant::now() + inner.init_timeout);
                            awaiting_init = true;
                        }
                        Err(e) => {
                            record_handshake_error(&inner, e);
                            inner.transport.close().await;
                        }
                    }
                }
                Some(TransportEvent::Message(frame)) => {
                    handle_frame(&inner, frame, &mut awaiting_init).await;
                }
                Some(TransportEvent::Error(reason)) => {
                    // Non-fatal once ready; fatal while the handshake is in
                    // flight (an initialize that cannot reach the server
                    // will never complete).
                    if awaiting_init {
                        awaiting_init = false;
                        warn!(reason = %reason, "transport error during handshake");
                        record_handshake_error(&inner, McpError::transport(reason));
                        inner.transport.close().await;
                    } else {
                        warn!(reason = %reason, "transport error");
                    }
                }
                Some(TransportEvent::Closed(reason)) => {
                    handle_closed(&inner, &reason);
                    break;
                }
                None => {
                    handle_closed(&inner, &CloseReason::Error("event channel closed".into()));
                    break;
                }
            },
            _ = &mut init_timer, if awaiting_init => {
                awaiting_init = false;
                warn!(timeout_ms = inner.init_timeout.as_millis() as u64, "initialize timed out");
                record_handshake_error(&inner, McpError::Timeout(inner.init_timeout));
                inner.transport.close().await;
            }
        }
    }

    debug!("connection event loop stopped");
}

/// Send the initialize request. Tracked with no waiter - its completion
/// drives the state transition instead of replying to a caller.
fn start_handshake(inner: &Arc<ConnectionInner>) -> McpResult<()> {
    let id = inner.tracker.next_id();
    inner
        .tracker
        .track(id, "initialize", None, inner.init_timeout);

    let call = methods::initialize(
        LATEST_PROTOCOL_VERSION,
        &inner.capabilities,
        &inner.client_info,
    );
    let request = JsonRpcRequest::new(id, call.method).with_params(call.params);
    send_message(inner, &request)
}

async fn handle_frame(inner: &Arc<ConnectionInner>, frame: Value, awaiting_init: &mut bool) {
    match classify(frame) {
        Ok(IncomingMessage::Response(response)) => {
            handle_response(inner, response, awaiting_init).await;
        }
        Ok(IncomingMessage::Request(request)) => {
            trace!(method = %request.method, id = %request.id, "server request");
            let answer = answer_server_request(inner.handler.as_ref(), &request).await;
            if let Err(e) = send_message(inner, &answer) {
                warn!(error = %e, "failed to answer server request");
            }
        }
        Ok(IncomingMessage::Notification(notification)) => {
            trace!(method = %notification.method, "server notification");
            if let Some(handler) = &inner.handler {
                handler
                    .handle_notification(&notification.method, notification.params)
                    .await;
            }
        }
        // Decoding failures are observability signals, not request failures.
        Err(e) => warn!(error = %e, "discarding invalid inbound frame"),
    }
}

async fn handle_response(
    inner: &Arc<ConnectionInner>,
    response: JsonRpcResponse,
    awaiting_init: &mut bool,
) {
    let Some(id) = response.id.as_u64() else {
        warn!(id = %response.id, "response with unrecognized id");
        return;
    };

    match response.into_result() {
        Ok(result) => match inner.tracker.complete(id) {
            Some((Some(waiter), method)) => {
                trace!(id, method = %method, "delivering response");
                let _ = waiter.send(Ok(result));
            }
            Some((None, method)) if method == "initialize" => {
                finish_handshake(inner, result, awaiting_init).await;
            }
            Some((None, method)) => {
                debug!(id, method = %method, "response for waiterless request")
            }
            None => debug!(id, "response for unknown request"),
        },
        Err(error) => match inner.tracker.fail(id) {
            Some((Some(waiter), method)) => {
                debug!(id, method = %method, code = error.code, "delivering server error");
                let _ = waiter.send(Err(McpError::Rpc(error)));
            }
            Some((None, method)) if method == "initialize" => {
                *awaiting_init = false;
                warn!(code = error.code, message = %error.message, "initialize failed");
                record_handshake_error(inner, McpError::Rpc(error));
                inner.transport.close().await;
            }
            Some((None, method)) => debug!(id, method = %method, "error for waiterless request"),
            None => debug!(id, "error for unknown request"),
        },
    }
}

async fn finish_handshake(inner: &Arc<ConnectionInner>, result: Value, awaiting_init: &mut bool) {
    *awaiting_init = false;

    let init: InitializeResult = match serde_json::from_value(result) {
        Ok(init) => init,
        Err(e) => {
            record_handshake_error(
                inner,
                McpError::invalid_message(format!("malformed initialize result: {}", e)),
            );
            inner.transport.close().await;
            return;
        }
    };

    info!(
        server = %init.server_info.name,
        server_version = %init.server_info.version,
        protocol = %init.protocol_version,
        "MCP server initialized"
    );
    if !is_known_version(&init.protocol_version) {
        debug!(version = %init.protocol_version, "server chose an unrecognized protocol version");
    }

    *write_lock(&inner.server) = Some(ServerSession {
        info: init.server_info,
        capabilities: init.capabilities,
        protocol_version: init.protocol_version,
        instructions: init.instructions,
    });

    let call = methods::initialized();
    let notification = JsonRpcNotification::new(call.method).with_params(call.params);
    if let Err(e) = send_message(inner, &notification) {
        record_handshake_error(inner, e);
        inner.transport.close().await;
        return;
    }

    inner.status.send_replace(ConnectionStatus::Ready);
}

/// Answer a server-initiated request.
///
/// The handler gets first refusal; the built-in answers cover `ping` and
/// `roots/list`, and everything else - `sampling/createMessage` included -
/// is rejected with method-not-found.
async fn answer_server_request(
    handler: Option<&Arc<dyn NotificationHandler>>,
    request: &JsonRpcRequest,
) -> JsonRpcResponse {
    if let Some(handler) = handler {
        if let Some(result) = handler
            .handle_request(&request.method, request.params.clone())
            .await
        {
            return match result {
                Ok(value) => JsonRpcResponse::success(request.id.clone(), value),
                Err(error) => JsonRpcResponse::error(request.id.clone(), error),
            };
        }
    }
    builtin_answer(request)
}

fn builtin_answer(request: &JsonRpcRequest) -> JsonRpcResponse {
    match request.method.as_str() {
        "ping" => JsonRpcResponse::success(request.id.clone(), json!({})),
        "roots/list" => JsonRpcResponse::success(request.id.clone(), json!({ "roots": [] })),
        other => JsonRpcResponse::error(request.id.clone(), RpcError::method_not_found(other)),
    }
}

fn handle_closed(inner: &Arc<ConnectionInner>, reason: &CloseReason) {
    let was_ready = *inner.status.borrow() == ConnectionStatus::Ready;
    inner.status.send_replace(ConnectionStatus::Disconnected);

    if !was_ready {
        record_handshake_error(inner, McpError::connection_closed(reason.to_string()));
    }

    let waiters = inner.tracker.fail_all();
    if !waiters.is_empty() {
        debug!(
            count = waiters.len(),
            reason = %reason,
            "failing outstanding requests"
        );
    }
    for (_, waiter, _) in waiters {
        if let Some(waiter) = waiter {
            let _ = waiter.send(Err(McpError::connection_closed(reason.to_string())));
        }
    }

    info!(reason = %reason, "connection closed");
}

fn send_message<T: Serialize>(inner: &ConnectionInner, message: &T) -> McpResult<()> {
    let value = serde_json::to_value(message)?;
    inner.transport.send(value)
}

fn record_handshake_error(inner: &ConnectionInner, error: McpError) {
    let mut guard = match inner.handshake_error.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    // Keep the first cause; later closure noise is less specific.
    guard.get_or_insert(error);
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
