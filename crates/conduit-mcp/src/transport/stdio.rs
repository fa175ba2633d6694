//! Stdio Transport
//!
//! Spawns an MCP server as a subprocess and speaks newline-delimited JSON
//! over its stdin/stdout. A reader task feeds stdout chunks through the
//! [`MessageBuffer`]; a writer task drains outbound messages to stdin. Child
//! exit is surfaced as the transport's close reason.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, trace, warn};

use crate::buffer::MessageBuffer;
use crate::protocol::error::{McpError, McpResult};
use crate::transport::{CloseReason, TransportEvent};

/// Grace period between closing stdin and killing the child.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Read chunk size for the stdout pump.
const READ_CHUNK: usize = 8 * 1024;

/// Stdio transport configuration.
#[derive(Debug, Clone, Default)]
pub struct StdioConfig {
    /// Command to run (e.g., "npx", "python", "./server")
    pub command: String,

    /// Arguments for the command
    pub args: Vec<String>,

    /// Environment variable overrides
    pub env: Vec<(String, String)>,

    /// Working directory for the process
    pub working_dir: Option<PathBuf>,

    /// Max bytes the message buffer may retain without a newline
    pub max_frame_bytes: Option<usize>,
}

impl StdioConfig {
    /// Create a new stdio configuration.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Subprocess transport speaking newline-delimited JSON.
pub struct StdioTransport {
    config: StdioConfig,
    outbound: std::sync::Mutex<Option<mpsc::UnboundedSender<Value>>>,
    child: Arc<Mutex<Option<Child>>>,
    connected: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Create an unstarted transport from a configuration.
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            outbound: std::sync::Mutex::new(None),
            child: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the subprocess and start the I/O pumps.
    ///
    /// Emits `Ready` once the process is up; every stdout frame arrives as a
    /// `Message` event, and child exit arrives as `Closed` with the exit
    /// status (0 maps to the "normal" close reason).
    pub async fn start(&mut self, events: mpsc::Sender<TransportEvent>) -> McpResult<()> {
        let program = resolve_program(&self.config.command)?;
        debug!(
            command = %self.config.command,
            program = %program.display(),
            args = ?self.config.args,
            "spawning MCP server process"
        );

        let mut cmd = Command::new(&program);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpError::spawn(format!("failed to spawn '{}': {}", self.config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn("failed to capture stdout"))?;

        *self.child.lock().await = Some(child);
        self.connected.store(true, Ordering::SeqCst);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *lock_outbound(&self.outbound) = Some(outbound_tx);

        if events.send(TransportEvent::Ready).await.is_err() {
            // Owner went away before we even started; tear down.
            self.close().await;
            return Err(McpError::transport("transport owner dropped"));
        }

        tokio::spawn(write_loop(stdin, outbound_rx));
        tokio::spawn(read_loop(
            stdout,
            events,
            Arc::clone(&self.child),
            Arc::clone(&self.connected),
            self.config
                .max_frame_bytes
                .map(MessageBuffer::with_max_frame_bytes)
                .unwrap_or_default(),
        ));

        Ok(())
    }

    /// Queue one message for the writer task.
    pub fn send(&self, message: Value) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::transport("stdio transport is not connected"));
        }
        let guard = lock_outbound(&self.outbound);
        let outbound = guard
            .as_ref()
            .ok_or_else(|| McpError::transport("stdio transport was never started"))?;
        outbound
            .send(message)
            .map_err(|_| McpError::transport("stdio writer has shut down"))
    }

    /// Close stdin first (EOF lets the server exit on its own), then kill
    /// the child if it is still around after a grace period.
    pub async fn close(&self) {
        // Dropping the sender ends the writer task, which drops stdin.
        lock_outbound(&self.outbound).take();

        if self.connected.load(Ordering::SeqCst) {
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        }

        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    debug!(command = %self.config.command, "killing MCP server process");
                    let _ = child.start_kill();
                }
            }
        }
    }

    /// Whether the child is still believed to be running.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Drain outbound messages to the child's stdin, one JSON object per line.
async fn write_loop(
    mut stdin: tokio::process::ChildStdin,
    mut outbound: mpsc::UnboundedReceiver<Value>,
) {
    while let Some(message) = outbound.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to serialize outbound message");
                continue;
            }
        };
        line.push(b'\n');

        if let Err(e) = stdin.write_all(&line).await {
            warn!(error = %e, "failed to write to MCP server stdin");
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!(error = %e, "failed to flush MCP server stdin");
            break;
        }
        trace!(bytes = line.len(), "wrote frame to MCP server");
    }
    // Receiver drained or pipe broke; dropping stdin sends EOF.
}

/// Pump stdout chunks through the message buffer and surface child exit.
async fn read_loop(
    mut stdout: tokio::process::ChildStdout,
    events: mpsc::Sender<TransportEvent>,
    child: Arc<Mutex<Option<Child>>>,
    connected: Arc<AtomicBool>,
    mut buffer: MessageBuffer,
) {
    let mut chunk = [0u8; READ_CHUNK];
    let reason = loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => {
                // EOF: flush any unterminated final frame, then collect the
                // exit status.
                if let Some(frame) = buffer.reset() {
                    let _ = events.send(TransportEvent::Message(frame)).await;
                }
                break wait_for_exit(&child).await;
            }
            Ok(n) => match buffer.append(&chunk[..n]) {
                Ok(frames) => {
                    for frame in frames {
                        if events.send(TransportEvent::Message(frame)).await.is_err() {
                            // Owner dropped its receiver; stop pumping.
                            connected.store(false, Ordering::SeqCst);
                            return;
                        }
                    }
                }
                Err(e) => {
                    // Frame overflow is fatal for the connection.
                    error!(error = %e, "message buffer overflow, failing transport");
                    kill_child(&child).await;
                    break CloseReason::Error(e.to_string());
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to read from MCP server stdout");
                kill_child(&child).await;
                break CloseReason::Error(e.to_string());
            }
        }
    };

    let stats = buffer.stats();
    debug!(
        reason = %reason,
        frames = stats.frames_out,
        parse_errors = stats.parse_errors,
        "MCP server stdout closed"
    );

    connected.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed(reason)).await;
}

async fn wait_for_exit(child: &Arc<Mutex<Option<Child>>>) -> CloseReason {
    let taken = child.lock().await.take();
    match taken {
        Some(mut child) => match child.wait().await {
            Ok(status) if status.success() => CloseReason::Normal,
            Ok(status) => match status.code() {
                Some(code) => CloseReason::ExitStatus(code),
                None => CloseReason::Error("terminated by signal".into()),
            },
            Err(e) => CloseReason::Error(format!("failed to reap child: {}", e)),
        },
        None => CloseReason::Normal,
    }
}

async fn kill_child(child: &Arc<Mutex<Option<Child>>>) {
    if let Some(mut child) = child.lock().await.take() {
        let _ = child.kill().await;
    }
}

fn lock_outbound(
    mutex: &std::sync::Mutex<Option<mpsc::UnboundedSender<Value>>>,
) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<Value>>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Locate the executable: explicit paths are used as-is, bare names are
/// searched on `PATH`.
fn resolve_program(command: &str) -> McpResult<PathBuf> {
    let path = Path::new(command);
    if path.components().count() > 1 || path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(command);
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }
    }

    Err(McpError::spawn(format!("'{}' not found on PATH", command)))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EVENT_CHANNEL_CAPACITY;

    #[test]
    fn test_stdio_config_builder() {
        let config = StdioConfig::new("npx")
            .args(["-y", "@modelcontextprotocol/server-filesystem"])
            .arg("/tmp")
            .env("DEBUG", "true")
            .working_dir("/home/user");

        assert_eq!(config.command, "npx");
        assert_eq!(config.args.len(), 3);
        assert_eq!(config.env, vec![("DEBUG".to_string(), "true".to_string())]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/home/user")));
    }

    #[test]
    fn test_resolve_program_explicit_path() {
        let path = resolve_program("/usr/bin/definitely-made-up").unwrap();
        assert_eq!(path, PathBuf::from("/usr/bin/definitely-made-up"));

        let path = resolve_program("./relative/server").unwrap();
        assert_eq!(path, PathBuf::from("./relative/server"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_program_searches_path() {
        // `sh` exists on every unix PATH.
        let path = resolve_program("sh").unwrap();
        assert!(path.is_absolute());
        assert!(is_executable(&path));
    }

    #[test]
    fn test_resolve_program_missing() {
        let err = resolve_program("conduit-no-such-binary-12345").unwrap_err();
        assert!(matches!(err, McpError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let mut transport = StdioTransport::new(StdioConfig::new("conduit-no-such-binary-12345"));
        let (tx, _rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let err = transport.start(tx).await.unwrap_err();
        assert!(matches!(err, McpError::Spawn(_)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let transport = StdioTransport::new(StdioConfig::new("cat"));
        let err = transport.send(serde_json::json!({})).unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cat_round_trip_and_close() {
        // `cat` echoes our frames back verbatim.
        let mut transport = StdioTransport::new(StdioConfig::new("cat"));
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        transport.start(tx).await.unwrap();

        assert!(matches!(rx.recv().await, Some(TransportEvent::Ready)));
        assert!(transport.is_connected());

        transport
            .send(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .unwrap();

        match rx.recv().await {
            Some(TransportEvent::Message(frame)) => {
                assert_eq!(frame["method"], "ping");
            }
            other => panic!("expected message, got {:?}", other),
        }

        transport.close().await;
        // stdin EOF makes cat exit 0.
        loop {
            match rx.recv().await {
                Some(TransportEvent::Closed(reason)) => {
                    assert_eq!(reason, CloseReason::Normal);
                    break;
                }
                Some(_) => continue,
                None => panic!("channel closed without a Closed event"),
            }
        }
        assert!(!transport.is_connected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_status_surfaced() {
        let mut transport =
            StdioTransport::new(StdioConfig::new("sh").arg("-c").arg("exit 3"));
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        transport.start(tx).await.unwrap();

        assert!(matches!(rx.recv().await, Some(TransportEvent::Ready)));
        loop {
            match rx.recv().await {
                Some(TransportEvent::Closed(reason)) => {
                    assert_eq!(reason, CloseReason::ExitStatus(3));
                    break;
                }
                Some(_) => continue,
                None => panic!("channel closed without a Closed event"),
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_final_frame_without_newline_flushed() {
        // printf without trailing newline: the frame only surfaces via the
        // EOF flush path.
        let mut transport = StdioTransport::new(
            StdioConfig::new("sh")
                .arg("-c")
                .arg(r#"printf '{"tail":true}'"#),
        );
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        transport.start(tx).await.unwrap();

        assert!(matches!(rx.recv().await, Some(TransportEvent::Ready)));

        let mut saw_tail = false;
        loop {
            match rx.recv().await {
                Some(TransportEvent::Message(frame)) => {
                    assert_eq!(frame, serde_json::json!({"tail": true}));
                    saw_tail = true;
                }
                Some(TransportEvent::Closed(reason)) => {
                    assert_eq!(reason, CloseReason::Normal);
                    break;
                }
                Some(TransportEvent::Error(_)) | Some(TransportEvent::Ready) => {}
                None => panic!("channel closed without a Closed event"),
            }
        }
        assert!(saw_tail, "buffered frame must flush before Closed");
    }
}
