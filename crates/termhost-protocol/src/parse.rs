//! Validation of incoming session requests.
//!
//! Wire messages keep every field optional so that a malformed request can
//! be answered with a precise error. This module turns a request-bearing
//! [`MessageType`] into a typed [`Request`], rejecting anything that is
//! missing a session id or carries impossible values before it reaches the
//! session manager.

use termhost_core::{SessionId, SessionOptions, TerminalSize, DEFAULT_COLS, DEFAULT_ROWS};
use thiserror::Error;

use crate::message::{MessageType, RequestKind};

/// A validated session request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Create(SessionOptions),
    Write { id: SessionId, data: String },
    Resize { id: SessionId, size: TerminalSize },
    Destroy { id: SessionId },
}

impl Request {
    /// Returns which request this is.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Create(_) => RequestKind::Create,
            Self::Write { .. } => RequestKind::Write,
            Self::Resize { .. } => RequestKind::Resize,
            Self::Destroy { .. } => RequestKind::Destroy,
        }
    }
}

impl RequestKind {
    /// Classifies a wire message; `None` for control messages.
    pub fn of(message: &MessageType) -> Option<Self> {
        match message {
            MessageType::Create { .. } => Some(Self::Create),
            MessageType::Write { .. } => Some(Self::Write),
            MessageType::Resize { .. } => Some(Self::Resize),
            MessageType::Destroy { .. } => Some(Self::Destroy),
            _ => None,
        }
    }
}

/// Reasons a request is rejected before reaching the manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{request} request is missing a session id")]
    MissingId { request: RequestKind },

    #[error("{request} request is missing field '{field}'")]
    MissingField {
        request: RequestKind,
        field: &'static str,
    },

    #[error("invalid terminal size {cols}x{rows}: columns and rows must be non-zero")]
    InvalidSize { cols: u16, rows: u16 },

    #[error("not a session request")]
    NotARequest,
}

impl ParseError {
    /// Stable machine-readable code, shared with manager errors.
    pub fn code(&self) -> &'static str {
        "invalid_request"
    }
}

fn require_id(id: Option<SessionId>, request: RequestKind) -> Result<SessionId, ParseError> {
    match id {
        Some(id) if !id.is_blank() => Ok(id),
        _ => Err(ParseError::MissingId { request }),
    }
}

fn size(cols: u16, rows: u16) -> Result<TerminalSize, ParseError> {
    TerminalSize::new(cols, rows).map_err(|_| ParseError::InvalidSize { cols, rows })
}

impl TryFrom<MessageType> for Request {
    type Error = ParseError;

    fn try_from(message: MessageType) -> Result<Self, Self::Error> {
        match message {
            MessageType::Create {
                shell,
                cwd,
                cols,
                rows,
                env,
            } => {
                size(
                    cols.unwrap_or(DEFAULT_COLS),
                    rows.unwrap_or(DEFAULT_ROWS),
                )?;
                Ok(Self::Create(SessionOptions {
                    shell,
                    cwd,
                    cols,
                    rows,
                    env,
                }))
            }
            MessageType::Write { id, data } => Ok(Self::Write {
                id: require_id(id, RequestKind::Write)?,
                data,
            }),
            MessageType::Resize { id, cols, rows } => {
                let id = require_id(id, RequestKind::Resize)?;
                let cols = cols.ok_or(ParseError::MissingField {
                    request: RequestKind::Resize,
                    field: "cols",
                })?;
                let rows = rows.ok_or(ParseError::MissingField {
                    request: RequestKind::Resize,
                    field: "rows",
                })?;
                Ok(Self::Resize {
                    id,
                    size: size(cols, rows)?,
                })
            }
            MessageType::Destroy { id } => Ok(Self::Destroy {
                id: require_id(id, RequestKind::Destroy)?,
            }),
            _ => Err(ParseError::NotARequest),
        }
    }
}
