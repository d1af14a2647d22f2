//! Pseudo-terminal process spawning.
//!
//! The manager never touches `portable-pty` directly. It goes through two
//! seams:
//! - [`PtySpawner`] starts a shell for a [`SessionConfig`]
//! - [`PtyProcess`] is the exclusively-owned handle to that shell
//!
//! A spawned process reports back through its [`ProcessListener`], which
//! tags every event with the session id and the process generation so the
//! manager can ignore events from a handle it has already released.
//!
//! # Threads
//!
//! `portable-pty` I/O is blocking, so each process gets two OS threads:
//!
//! ```text
//!   reader thread ── read() loop ──▶ ProcessEvent::Output ──┐
//!                                                            ├──▶ manager command channel
//!   waiter thread ── child.wait() ─▶ ProcessEvent::Exited ──┘
//! ```
//!
//! The waiter gives the reader a short grace period to drain trailing
//! output so that `Exited` normally arrives after the last `Output`.

use std::io::{self, Read, Write};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use termhost_core::{SessionConfig, SessionId, TerminalSize};

use crate::manager::ManagerCommand;

/// `TERM` value exported to shells whose environment does not set one.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Read buffer size for the PTY reader thread.
const READ_BUFFER_SIZE: usize = 8192;

/// How long the waiter waits for the reader to drain after the child exits.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

// ============================================================================
// Process Events
// ============================================================================

/// Something a live shell process reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Output decoded as UTF-8 (split multi-byte sequences are carried over).
    Output(String),

    /// The process exited. `None` when no exit status could be determined.
    Exited(Option<i32>),

    /// Waiting on the process failed out-of-band.
    Failed(String),
}

/// Routes events from one process generation into the manager.
///
/// Holds only a weak sender: once every `ManagerHandle` is gone the
/// manager stops, even while reader and waiter threads are still running.
#[derive(Debug, Clone)]
pub struct ProcessListener {
    session_id: SessionId,
    generation: u64,
    sender: mpsc::WeakSender<ManagerCommand>,
}

impl ProcessListener {
    pub fn new(
        session_id: SessionId,
        generation: u64,
        sender: mpsc::WeakSender<ManagerCommand>,
    ) -> Self {
        Self {
            session_id,
            generation,
            sender,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn command(&self, event: ProcessEvent) -> ManagerCommand {
        ManagerCommand::Process {
            session_id: self.session_id.clone(),
            generation: self.generation,
            event,
        }
    }

    /// Sends an event from a plain OS thread.
    ///
    /// Returns `false` once the manager has shut down.
    /// Must not be called from within the tokio runtime.
    pub fn emit_blocking(&self, event: ProcessEvent) -> bool {
        match self.sender.upgrade() {
            Some(sender) => sender.blocking_send(self.command(event)).is_ok(),
            None => false,
        }
    }

    /// Sends an event from async code.
    pub async fn emit(&self, event: ProcessEvent) -> bool {
        match self.sender.upgrade() {
            Some(sender) => sender.send(self.command(event)).await.is_ok(),
            None => false,
        }
    }
}

// ============================================================================
// Spawn Errors
// ============================================================================

/// Why a shell could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The OS refused access. Not specific to the shell, so no fallback.
    #[error("permission denied spawning {shell}: {message}")]
    PermissionDenied { shell: String, message: String },

    /// The shell executable does not exist.
    #[error("shell not found: {shell}")]
    NotFound { shell: String },

    /// Any other spawn failure.
    #[error("failed to spawn {shell}: {message}")]
    Failed { shell: String, message: String },
}

impl SpawnError {
    /// Classifies an error from `portable-pty`.
    ///
    /// Prefers the `io::ErrorKind` of any wrapped I/O error, falling back to
    /// the rendered message for errors that `portable-pty` formats itself.
    pub fn classify(shell: &str, err: &anyhow::Error) -> Self {
        let kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<io::Error>())
            .map(io::Error::kind);
        let message = format!("{err:#}");

        match kind {
            Some(io::ErrorKind::PermissionDenied) => Self::permission_denied(shell, message),
            Some(io::ErrorKind::NotFound) => Self::NotFound {
                shell: shell.to_string(),
            },
            _ if is_permission_message(&message) => Self::permission_denied(shell, message),
            _ if is_not_found_message(&message) => Self::NotFound {
                shell: shell.to_string(),
            },
            _ => Self::Failed {
                shell: shell.to_string(),
                message,
            },
        }
    }

    fn permission_denied(shell: &str, message: String) -> Self {
        Self::PermissionDenied {
            shell: shell.to_string(),
            message,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    pub fn shell(&self) -> &str {
        match self {
            Self::PermissionDenied { shell, .. } | Self::NotFound { shell } | Self::Failed { shell, .. } => {
                shell
            }
        }
    }
}

fn is_permission_message(message: &str) -> bool {
    message.contains("Permission denied")
        || message.contains("os error 13")
        || message.contains("EACCES")
        || message.contains("Access is denied")
}

fn is_not_found_message(message: &str) -> bool {
    message.contains("No such file")
        || message.contains("doesn't exist")
        || message.contains("os error 2")
        || message.contains("cannot find the file")
}

// ============================================================================
// Seams
// ============================================================================

/// Exclusively-owned handle to one live shell process.
pub trait PtyProcess: Send {
    /// Writes raw bytes to the terminal input.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Changes the terminal dimensions.
    fn resize(&mut self, size: TerminalSize) -> io::Result<()>;

    /// Terminates the process. Errors if it is already gone.
    fn kill(&mut self) -> io::Result<()>;

    /// OS process id, if the platform reports one.
    fn pid(&self) -> Option<u32>;
}

/// Starts shell processes inside pseudo-terminals.
pub trait PtySpawner: Send + Sync {
    fn spawn(
        &self,
        config: &SessionConfig,
        listener: ProcessListener,
    ) -> Result<Box<dyn PtyProcess>, SpawnError>;
}

// ============================================================================
// portable-pty implementation
// ============================================================================

/// Spawner backed by the platform's native PTY system.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySpawner;

struct NativePtyProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn build_command(config: &SessionConfig) -> CommandBuilder {
    let mut cmd = CommandBuilder::new(&config.shell);
    cmd.cwd(&config.cwd);
    cmd.env_clear();
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if !config.env.contains_key("TERM") {
        cmd.env("TERM", DEFAULT_TERM);
    }
    cmd
}

impl PtySpawner for NativePtySpawner {
    fn spawn(
        &self,
        config: &SessionConfig,
        listener: ProcessListener,
    ) -> Result<Box<dyn PtyProcess>, SpawnError> {
        let shell = config.shell.as_str();
        let pair = native_pty_system()
            .openpty(pty_size(config.size))
            .map_err(|e| SpawnError::classify(shell, &e))?;

        let mut child = pair
            .slave
            .spawn_command(build_command(config))
            .map_err(|e| SpawnError::classify(shell, &e))?;
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        let mut killer = child.clone_killer();

        let io_handles = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (reader, writer) = match io_handles {
            Ok(handles) => handles,
            Err(e) => {
                let _ = killer.kill();
                return Err(SpawnError::classify(shell, &e));
            }
        };

        if let Err(e) = start_io_threads(reader, child, listener) {
            let _ = killer.kill();
            return Err(SpawnError::Failed {
                shell: shell.to_string(),
                message: e.to_string(),
            });
        }

        debug!(shell = %shell, pid = ?pid, size = %config.size, "Spawned shell in pty");

        Ok(Box::new(NativePtyProcess {
            master: pair.master,
            writer,
            killer,
            pid,
        }))
    }
}

fn start_io_threads(
    reader: Box<dyn Read + Send>,
    child: Box<dyn Child + Send + Sync>,
    listener: ProcessListener,
) -> io::Result<()> {
    let (drained_tx, drained_rx) = std_mpsc::channel::<()>();
    let short_id = listener.session_id().short().to_string();

    let output_listener = listener.clone();
    thread::Builder::new()
        .name(format!("pty-read-{short_id}"))
        .spawn(move || {
            read_output(reader, &output_listener);
            let _ = drained_tx.send(());
        })?;

    thread::Builder::new()
        .name(format!("pty-wait-{short_id}"))
        .spawn(move || wait_for_exit(child, drained_rx, &listener))?;

    Ok(())
}

fn read_output(mut reader: Box<dyn Read + Send>, listener: &ProcessListener) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut decoder = Utf8Decoder::default();

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(buf.get(..n).unwrap_or_default());
                if !text.is_empty() && !listener.emit_blocking(ProcessEvent::Output(text)) {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Linux reports EIO on the master once the child side closes.
            Err(_) => break,
        }
    }

    if let Some(rest) = decoder.finish() {
        listener.emit_blocking(ProcessEvent::Output(rest));
    }
}

fn wait_for_exit(
    mut child: Box<dyn Child + Send + Sync>,
    drained: std_mpsc::Receiver<()>,
    listener: &ProcessListener,
) {
    let event = match child.wait() {
        Ok(status) => {
            let _ = drained.recv_timeout(OUTPUT_DRAIN_GRACE);
            // Windows NTSTATUS codes exceed i32::MAX; wrap them to stay non-zero.
            ProcessEvent::Exited(Some(status.exit_code() as i32))
        }
        Err(e) => {
            warn!(
                session_id = %listener.session_id(),
                error = %e,
                "Failed waiting on shell process"
            );
            ProcessEvent::Failed(e.to_string())
        }
    };
    listener.emit_blocking(event);
}

impl PtyProcess for NativePtyProcess {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    fn resize(&mut self, size: TerminalSize) -> io::Result<()> {
        self.master
            .resize(pty_size(size))
            .map_err(|e| io::Error::other(e.to_string()))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.killer.kill()
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

// ============================================================================
// UTF-8 decoding across read boundaries
// ============================================================================

/// Decodes a byte stream to text without splitting multi-byte characters
/// that straddle two reads. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            // Incomplete sequence at the end: keep it for the next read.
            Err(e) if e.error_len().is_none() => {
                let tail = self.pending.split_off(e.valid_up_to());
                let head = std::mem::replace(&mut self.pending, tail);
                String::from_utf8_lossy(&head).into_owned()
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}
