//! Manager actor commands, errors, and events.
//!
//! - `ManagerCommand`: everything the actor can be asked to do, including
//!   lifecycle events fed in by process threads and recovery timers
//! - `ManagerError`: errors returned to callers, each with a stable code
//! - `TerminalEvent`: notifications pushed through the event sink

use termhost_core::{RecoveryStatus, SessionId, SessionOptions, SessionView};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::pty::ProcessEvent;

// ============================================================================
// Manager Commands
// ============================================================================

/// Commands sent to the manager actor.
///
/// Requests carry a oneshot channel for the reply. Lifecycle commands
/// (`Process`, `AttemptRecovery`) are fire-and-forget.
#[derive(Debug)]
pub enum ManagerCommand {
    /// Spawn a shell and register a new session.
    ///
    /// # Errors
    /// - `ManagerError::PermissionDenied` if the OS refused a spawn
    /// - `ManagerError::AllShellsFailed` if no candidate shell started
    /// - `ManagerError::Capacity` if the session limit is reached
    /// - `ManagerError::InvalidSize` for zero columns or rows
    Create {
        /// Creation options (boxed to keep the enum small)
        options: Box<SessionOptions>,
        respond_to: oneshot::Sender<Result<SessionId, ManagerError>>,
    },

    /// Forward raw input bytes to a session's shell.
    ///
    /// # Errors
    /// - `ManagerError::SessionNotFound` for an unknown id
    /// - `ManagerError::SessionDisabled` if the session was disabled
    Write {
        session_id: SessionId,
        data: Vec<u8>,
        respond_to: oneshot::Sender<Result<(), ManagerError>>,
    },

    /// Change a session's terminal dimensions.
    ///
    /// # Errors
    /// - `ManagerError::InvalidSize` for zero columns or rows
    /// - `ManagerError::SessionNotFound` for an unknown id
    /// - `ManagerError::SessionDisabled` if the session was disabled
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
        respond_to: oneshot::Sender<Result<(), ManagerError>>,
    },

    /// Tear down a session. Unknown ids are a no-op.
    Destroy {
        session_id: SessionId,
        respond_to: oneshot::Sender<()>,
    },

    /// Get a single session by ID.
    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionView>>,
    },

    /// Get all sessions as views.
    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionView>>,
    },

    /// Destroy every live session. Replies with how many were destroyed.
    Cleanup { respond_to: oneshot::Sender<usize> },

    /// Lifecycle event from a spawned process.
    ///
    /// Ignored unless `generation` matches the session's current process.
    Process {
        session_id: SessionId,
        generation: u64,
        event: ProcessEvent,
    },

    /// A recovery delay elapsed.
    AttemptRecovery { session_id: SessionId },
}

// ============================================================================
// Manager Errors
// ============================================================================

/// Errors returned by manager operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session is disabled: {0}")]
    SessionDisabled(SessionId),

    /// The OS refused to start a shell. No other candidates are tried.
    #[error("permission denied spawning {shell}: {message}")]
    PermissionDenied { shell: String, message: String },

    #[error("no shell could be started (tried: {tried}): {last_error}", tried = .attempted.join(", "))]
    AllShellsFailed {
        attempted: Vec<String>,
        last_error: String,
    },

    #[error("session limit reached (max: {max} sessions)")]
    Capacity { max: usize },

    #[error("invalid terminal size {cols}x{rows}: columns and rows must be non-zero")]
    InvalidSize { cols: u16, rows: u16 },

    /// Writing to or resizing the pseudo-terminal failed.
    #[error("terminal i/o failed for session {session_id}: {message}")]
    Io {
        session_id: SessionId,
        message: String,
    },

    /// The actor shut down before replying.
    #[error("response channel closed")]
    ChannelClosed,
}

impl ManagerError {
    /// Stable machine-readable code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionDisabled(_) => "session_disabled",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::AllShellsFailed { .. } => "spawn_failed",
            Self::Capacity { .. } => "capacity",
            Self::InvalidSize { .. } => "invalid_request",
            Self::Io { .. } | Self::ChannelClosed => "internal",
        }
    }
}

// ============================================================================
// Terminal Events
// ============================================================================

/// Notifications pushed to the front end. One stream carries all sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// Output produced by a session's shell.
    Data { id: SessionId, data: String },

    /// A session's shell exited. Pushed before the exit is handled.
    Exit { id: SessionId, code: Option<i32> },

    /// A session's supervision state changed.
    Recovery {
        id: SessionId,
        status: RecoveryStatus,
    },
}

impl TerminalEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Data { id, .. } | Self::Exit { id, .. } | Self::Recovery { id, .. } => id,
        }
    }
}
