//! Protocol message types for daemon communication.
//!
//! Messages are JSON objects, one per line, discriminated by a `type` field.

use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use termhost_core::{RecoveryStatus, SessionId, SessionView};

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Spawn a new shell session
    Create {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env: Option<BTreeMap<String, String>>,
    },

    /// Forward raw input to a session
    ///
    /// `id` is optional on the wire so a missing id is reported as an
    /// invalid request instead of an opaque parse failure.
    Write {
        #[serde(default)]
        id: Option<SessionId>,
        #[serde(default)]
        data: String,
    },

    /// Change a session's terminal dimensions
    Resize {
        #[serde(default)]
        id: Option<SessionId>,
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },

    /// Tear down a session
    Destroy {
        #[serde(default)]
        id: Option<SessionId>,
    },

    /// Request current session list
    ListSessions,

    /// Subscribe to session notifications
    Subscribe {
        /// Optional filter by session ID
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },

    /// Unsubscribe from notifications
    Unsubscribe,

    /// Ping to check connection
    Ping { seq: u64 },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    /// Creates a create request with every option left to its default.
    pub fn create_default() -> Self {
        Self::new(MessageType::Create {
            shell: None,
            cwd: None,
            cols: None,
            rows: None,
            env: None,
        })
    }

    pub fn write(id: SessionId, data: impl Into<String>) -> Self {
        Self::new(MessageType::Write {
            id: Some(id),
            data: data.into(),
        })
    }

    pub fn resize(id: SessionId, cols: u16, rows: u16) -> Self {
        Self::new(MessageType::Resize {
            id: Some(id),
            cols: Some(cols),
            rows: Some(rows),
        })
    }

    pub fn destroy(id: SessionId) -> Self {
        Self::new(MessageType::Destroy { id: Some(id) })
    }

    pub fn list_sessions() -> Self {
        Self::new(MessageType::ListSessions)
    }

    pub fn subscribe(session_id: Option<SessionId>) -> Self {
        Self::new(MessageType::Subscribe { session_id })
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Which request a `response` message answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Create,
    Write,
    Resize,
    Destroy,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Write => write!(f, "write"),
            Self::Resize => write!(f, "resize"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Outcome of a create/write/resize/destroy request
    Response {
        request: RequestKind,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<SessionId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Stable machine-readable error code
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Full session list response
    SessionList { sessions: Vec<SessionView> },

    /// Output produced by a session's shell
    Data { id: SessionId, data: String },

    /// A session's shell process exited
    Exit {
        id: SessionId,
        #[serde(default)]
        code: Option<i32>,
    },

    /// A session's supervision state changed
    Recovery { id: SessionId, status: RecoveryStatus },

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error not tied to a specific request
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    /// Creates a successful response, optionally naming the session.
    pub fn success(request: RequestKind, id: Option<SessionId>) -> Self {
        Self::Response {
            request,
            success: true,
            id,
            error: None,
            code: None,
        }
    }

    /// Creates a failed response with an error message and code.
    pub fn failure(request: RequestKind, error: &str, code: &str) -> Self {
        Self::Response {
            request,
            success: false,
            id: None,
            error: Some(error.to_string()),
            code: Some(code.to_string()),
        }
    }

    pub fn session_list(sessions: Vec<SessionView>) -> Self {
        Self::SessionList { sessions }
    }

    pub fn data(id: SessionId, data: String) -> Self {
        Self::Data { id, data }
    }

    pub fn exit(id: SessionId, code: Option<i32>) -> Self {
        Self::Exit { id, code }
    }

    pub fn recovery(id: SessionId, status: RecoveryStatus) -> Self {
        Self::Recovery { id, status }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    /// Returns the session a notification is about, if it is one.
    pub fn notification_session(&self) -> Option<&SessionId> {
        match self {
            Self::Data { id, .. } | Self::Exit { id, .. } | Self::Recovery { id, .. } => Some(id),
            _ => None,
        }
    }
}
