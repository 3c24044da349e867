//! Stdio transport for MCP communication.
//!
//! One child process, one exchange at a time. Messages are newline-delimited
//! JSON: every request, response and notification is a single line.
//!
//! # Peer contract
//!
//! [`StdioTransport::send`] writes a request and treats the *next* line on
//! stdout as its response. A server must therefore not emit unsolicited
//! lines (progress or log notifications) while a request is outstanding;
//! such a line is reported as [`McpError::IdMismatch`] and the transport is
//! marked failed. There is deliberately no demultiplexing reader.
//!
//! # Lifecycle
//!
//! The exchange lock guards the pipes. The child handle lives behind its own
//! lock so [`StdioTransport::stop`] can interrupt and kill a process whose
//! exchange is still blocked on a read (for example after a caller-side
//! timeout).

use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::env::expand_map;
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Largest accepted line from a server (tool schemas can be big).
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// How long `stop` waits after the interrupt before killing.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// Number of stderr lines retained for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Tunables for a stdio transport.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Maximum size of one response line in bytes.
    pub max_line_bytes: usize,
    /// Grace period between interrupt and kill on stop.
    pub stop_grace: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

impl TransportOptions {
    /// Set the maximum line size.
    pub fn with_max_line_bytes(mut self, bytes: usize) -> Self {
        self.max_line_bytes = bytes;
        self
    }

    /// Set the stop grace period.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

struct Pipes {
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: BufReader<ChildStdout>,
}

/// JSON-RPC over a child process's standard streams.
pub struct StdioTransport {
    label: String,
    pipes: Mutex<Option<Pipes>>,
    child: Mutex<Option<Child>>,
    running: AtomicBool,
    next_id: AtomicU64,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    options: TransportOptions,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("label", &self.label)
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}

impl StdioTransport {
    /// Spawn `command` with default options.
    ///
    /// `label` names the transport in logs (usually the server name).
    pub fn spawn(
        label: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self> {
        Self::spawn_with(label, command, args, env, TransportOptions::default())
    }

    /// Spawn `command` with explicit options.
    ///
    /// The child sees the current environment overlaid with `env`, whose
    /// values are expanded against the current environment first.
    pub fn spawn_with(
        label: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        options: TransportOptions,
    ) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(expand_map(env))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| McpError::spawn_failed(format!("failed to spawn '{}': {}", command, e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(McpError::spawn_failed("failed to capture child stdio pipes"));
        };

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Err(e) = spawn_stderr_drain(label, stderr, Arc::clone(&stderr_tail)) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(McpError::spawn_failed(format!(
                "failed to start stderr drain: {}",
                e
            )));
        }

        tracing::debug!(
            server = %label,
            command = %command,
            pid = child.id(),
            "Spawned MCP server process"
        );

        Ok(Self {
            label: label.to_string(),
            pipes: Mutex::new(Some(Pipes {
                stdin: Some(BufWriter::new(stdin)),
                stdout: BufReader::new(stdout),
            })),
            child: Mutex::new(Some(child)),
            running: AtomicBool::new(true),
            next_id: AtomicU64::new(0),
            stderr_tail,
            options,
        })
    }

    /// Name used in logs and error messages.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id, while the child is held.
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().map(Child::id)
    }

    /// Send a request and read its response.
    ///
    /// Holds the exchange lock for the whole write + read. Any failure marks
    /// the transport as failed; later calls return
    /// [`McpError::ConnectionClosed`].
    pub fn send(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(McpError::ConnectionClosed);
        }

        let mut guard = self.pipes.lock();
        let pipes = guard.as_mut().ok_or(McpError::ConnectionClosed)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request)?;

        let result = self.exchange(pipes, id, &line);
        if result.is_err() {
            self.running.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Write a notification. No reply is read.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(McpError::ConnectionClosed);
        }
        let mut guard = self.pipes.lock();
        let pipes = guard.as_mut().ok_or(McpError::ConnectionClosed)?;
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        let result = self.write_line(pipes, &line);
        if result.is_err() {
            self.running.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Whether the transport is usable and the process has not exited.
    pub fn is_running(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        match self.child.lock().as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Recent stderr lines from the child, oldest first.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().iter().cloned().collect()
    }

    /// Close stdin, interrupt, wait for exit, and kill if it lingers.
    ///
    /// Idempotent.
    pub fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        // An exchange may still hold the pipes after a caller-side timeout.
        // Its read fails once the process is gone.
        if let Some(mut guard) = self.pipes.try_lock()
            && let Some(pipes) = guard.as_mut()
        {
            pipes.stdin.take();
        }

        let Some(mut child) = self.child.lock().take() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(server = %self.label, %status, "MCP server already exited");
            return Ok(());
        }

        interrupt(&child);

        let deadline = Instant::now() + self.options.stop_grace;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(server = %self.label, %status, "MCP server exited");
                    return Ok(());
                }
                Ok(None) => std::thread::sleep(EXIT_POLL_INTERVAL),
                Err(e) => {
                    tracing::warn!(server = %self.label, error = %e, "Failed to poll MCP server");
                    break;
                }
            }
        }

        tracing::warn!(
            server = %self.label,
            grace_ms = self.options.stop_grace.as_millis() as u64,
            "MCP server did not exit after interrupt; killing"
        );
        match child.kill() {
            Ok(()) => {}
            // Already reaped between the last poll and the kill.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(McpError::Io(e)),
        }
        child.wait()?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Framing
    // ─────────────────────────────────────────────────────────────────────────

    fn exchange(&self, pipes: &mut Pipes, id: u64, line: &str) -> Result<JsonRpcResponse> {
        self.write_line(pipes, line)?;

        let raw = loop {
            match read_line(&mut pipes.stdout, self.options.max_line_bytes) {
                Ok(Some(raw)) if raw.iter().all(u8::is_ascii_whitespace) => continue,
                Ok(Some(raw)) => break raw,
                Ok(None) => {
                    return Err(McpError::transport(format!(
                        "server '{}' closed its output{}",
                        self.label,
                        self.stderr_suffix()
                    )));
                }
                Err(ReadLineError::TooLong) => {
                    return Err(McpError::protocol(format!(
                        "response line from '{}' exceeds {} bytes",
                        self.label, self.options.max_line_bytes
                    )));
                }
                Err(ReadLineError::Io(e)) => {
                    return Err(McpError::transport(format!(
                        "read from '{}' failed: {}",
                        self.label, e
                    )));
                }
            }
        };

        let response: JsonRpcResponse = serde_json::from_slice(&raw).map_err(|e| {
            McpError::protocol(format!(
                "malformed response from '{}': {}",
                self.label, e
            ))
        })?;

        if !response.matches_id(id) {
            return Err(McpError::IdMismatch {
                expected: id,
                actual: response.id.to_string(),
            });
        }

        Ok(response)
    }

    fn write_line(&self, pipes: &mut Pipes, line: &str) -> Result<()> {
        let stdin = pipes.stdin.as_mut().ok_or(McpError::ConnectionClosed)?;
        let written = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        written.map_err(|e| {
            McpError::transport(format!(
                "write to '{}' failed: {}{}",
                self.label,
                e,
                self.stderr_suffix()
            ))
        })
    }

    fn stderr_suffix(&self) -> String {
        let tail = self.stderr_tail();
        if tail.is_empty() {
            String::new()
        } else {
            format!(" (stderr: {})", tail.join(" | "))
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

enum ReadLineError {
    TooLong,
    Io(std::io::Error),
}

/// Read one `\n`-terminated line of at most `max` bytes (excluding the
/// terminator). `Ok(None)` means end of stream.
fn read_line<R: BufRead>(
    reader: &mut R,
    max: usize,
) -> std::result::Result<Option<Vec<u8>>, ReadLineError> {
    let mut buf = Vec::new();
    let limit = max as u64 + 1;
    let n = reader
        .by_ref()
        .take(limit)
        .read_until(b'\n', &mut buf)
        .map_err(ReadLineError::Io)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > max {
        return Err(ReadLineError::TooLong);
    }
    Ok(Some(buf))
}

fn spawn_stderr_drain(
    label: &str,
    stderr: std::process::ChildStderr,
    tail: Arc<Mutex<VecDeque<String>>>,
) -> std::io::Result<()> {
    let label = label.to_string();
    std::thread::Builder::new()
        .name(format!("mcp-stderr-{}", label))
        .spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        tracing::debug!(server = %label, "stderr: {}", line);
                        let mut tail = tail.lock();
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            }
        })?;
    Ok(())
}

#[cfg(unix)]
fn interrupt(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGINT) {
        tracing::debug!(pid, error = %e, "Failed to interrupt MCP server");
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) {}
