//! HTTP Transport
//!
//! POSTs each outbound message to a remote MCP endpoint. Response bodies may
//! be a single JSON object, a JSON array (a batch of frames), or a complete
//! SSE stream; all of them surface as `Message` events. A server-assigned
//! `mcp-session-id` header is captured from any response and echoed on every
//! subsequent request for the life of the transport.
//!
//! Each POST runs on its own task, so concurrent sends never block each
//! other and responses complete in whatever order the server answers. Task
//! registration shares a critical section with the closed flip, and every
//! event emission holds the gate that `close` flips, so no `Message` can be
//! delivered after `Closed`.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::protocol::error::{McpError, McpResult};
use crate::transport::{sse, CloseReason, TransportEvent};

/// Session header defined by the MCP streamable-HTTP transport.
const SESSION_HEADER: &str = "mcp-session-id";

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for [`HttpTransport`].
pub struct HttpTransportBuilder {
    url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl HttpTransportBuilder {
    /// Create a builder for the given endpoint URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Add a custom header sent on every request.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Add multiple headers at once.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the per-request timeout (default 30 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the transport.
    pub fn build(self) -> McpResult<HttpTransport> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(HttpTransport {
            url: self.url,
            headers: self.headers,
            client,
            events: None,
            session: Arc::new(RwLock::new(None)),
            tasks: Mutex::new(Some(Vec::new())),
            gate: Arc::new(tokio::sync::Mutex::new(false)),
        })
    }
}

/// HTTP POST transport for remote MCP servers.
pub struct HttpTransport {
    url: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
    events: Option<mpsc::Sender<TransportEvent>>,
    session: Arc<RwLock<Option<String>>>,
    /// In-flight POST tasks; `None` once the transport is closed.
    tasks: Mutex<Option<Vec<JoinHandle<()>>>>,
    /// Orders event emission against the closed flip: tasks emit while
    /// holding the gate, `close` flips it to `true` and emits `Closed` under
    /// the same guard.
    gate: Arc<tokio::sync::Mutex<bool>>,
}

impl HttpTransport {
    /// Start building a transport for the given URL.
    pub fn builder(url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(url)
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The sticky session ID, if the server has assigned one.
    pub fn session_id(&self) -> Option<String> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    /// Store the event sender and report ready.
    ///
    /// There is no connection preamble; the transport is usable as soon as
    /// it exists. A dead endpoint surfaces on the first POST instead.
    pub async fn start(&mut self, events: mpsc::Sender<TransportEvent>) -> McpResult<()> {
        if events.send(TransportEvent::Ready).await.is_err() {
            return Err(McpError::transport("transport owner dropped"));
        }
        self.events = Some(events);
        Ok(())
    }

    /// POST one message on its own task.
    ///
    /// Serialization happens here so the caller gets the error synchronously;
    /// network failures arrive later as `Error` events.
    pub fn send(&self, message: Value) -> McpResult<()> {
        let events = self
            .events
            .as_ref()
            .ok_or_else(|| McpError::transport("http transport was never started"))?
            .clone();

        let body = serde_json::to_string(&message)?;
        let client = self.client.clone();
        let url = self.url.clone();
        let headers = self.headers.clone();
        let session = Arc::clone(&self.session);
        let gate = Arc::clone(&self.gate);

        // The closed check, the spawn, and the registration share one
        // critical section: a concurrent `close` either refuses this send or
        // sees the handle it must abort.
        let mut registry = lock_tasks(&self.tasks);
        let tasks = registry
            .as_mut()
            .ok_or_else(|| McpError::transport("http transport is closed"))?;

        let handle = tokio::spawn(async move {
            let outcome = post_once(client, &url, &headers, &session, body).await;

            // Emit while holding the gate: once `close` has flipped it and
            // delivered `Closed`, nothing more goes out.
            let closed = gate.lock().await;
            if *closed {
                return;
            }
            match outcome {
                Ok(events_out) => {
                    for event in events_out {
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(reason) => {
                    let _ = events.send(TransportEvent::Error(reason)).await;
                }
            }
        });

        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
        Ok(())
    }

    /// Stop the transport: abort in-flight POSTs and emit the final `Closed`.
    pub async fn close(&self) {
        let drained = lock_tasks(&self.tasks).take();
        let Some(tasks) = drained else {
            // Already closed.
            return;
        };
        // Abort before taking the gate: a task parked mid-emission is
        // cancelled at its await point and releases the gate.
        for task in tasks {
            task.abort();
        }

        let mut closed = self.gate.lock().await;
        if !*closed {
            *closed = true;
            if let Some(events) = &self.events {
                let _ = events.send(TransportEvent::Closed(CloseReason::Normal)).await;
            }
        }
        debug!(url = %self.url, "http transport closed");
    }

    /// Whether the transport can still carry messages.
    pub fn is_connected(&self) -> bool {
        self.events.is_some() && lock_tasks(&self.tasks).is_some()
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .field(
                "headers",
                &self.headers.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .field("closed", &lock_tasks(&self.tasks).is_none())
            .finish()
    }
}

fn lock_tasks(
    mutex: &Mutex<Option<Vec<JoinHandle<()>>>>,
) -> MutexGuard<'_, Option<Vec<JoinHandle<()>>>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Run one POST round trip and translate the response into events.
async fn post_once(
    client: reqwest::Client,
    url: &str,
    headers: &[(String, String)],
    session: &RwLock<Option<String>>,
    body: String,
) -> Result<Vec<TransportEvent>, String> {
    trace!(url = %url, body = %body, "sending MCP HTTP request");

    let mut request = client
        .post(url)
        .header("accept", "application/json, text/event-stream")
        .header("content-type", "application/json");

    let current_session = session.read().ok().and_then(|s| s.clone());
    if let Some(id) = current_session {
        request = request.header(SESSION_HEADER, id);
    }
    for (key, value) in headers {
        request = request.header(key, value);
    }

    let response = request
        .body(body)
        .send()
        .await
        .map_err(|e| format!("HTTP request failed: {}", e))?;

    // Header lookup is case-insensitive; the session sticks until close.
    if let Some(id) = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        if let Ok(mut slot) = session.write() {
            if slot.as_deref() != Some(id) {
                debug!(session = %id, "captured MCP session id");
                *slot = Some(id.to_string());
            }
        }
    }

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let text = response
        .text()
        .await
        .map_err(|e| format!("failed to read response body: {}", e))?;

    Ok(response_events(status, &content_type, &text))
}

/// Translate one HTTP response into transport events.
fn response_events(status: u16, content_type: &str, body: &str) -> Vec<TransportEvent> {
    // 202 acknowledges a notification; there is nothing to deliver.
    if status == 202 {
        return Vec::new();
    }

    if !(200..300).contains(&status) {
        return vec![TransportEvent::Error(format!(
            "HTTP error {}: {}",
            status, body
        ))];
    }

    if content_type.starts_with("text/event-stream") {
        let (frames, errors) = sse::frames(body);
        let mut events: Vec<TransportEvent> =
            frames.into_iter().map(TransportEvent::Message).collect();
        events.extend(errors.into_iter().map(TransportEvent::Error));
        return events;
    }

    if body.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => items.into_iter().map(TransportEvent::Message).collect(),
        Ok(value @ Value::Object(_)) => vec![TransportEvent::Message(value)],
        Ok(other) => vec![TransportEvent::Error(format!(
            "response body is not an object or array: {}",
            other
        ))],
        Err(e) => {
            warn!(error = %e, "undecodable HTTP response body");
            vec![TransportEvent::Error(format!(
                "undecodable response body: {}",
                e
            ))]
        }
    }
}
