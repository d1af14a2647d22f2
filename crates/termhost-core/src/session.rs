//! Session identity, configuration and status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for a terminal session.
///
/// Generated once at creation (UUID v4) and kept for the lifetime of the
/// session, including across recovery respawns. Identifiers are never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a SessionId from an existing string.
    ///
    /// Used for ids arriving over the wire; does not validate UUID format.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns true if the id is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Session Status
// ============================================================================

/// Supervision state of a session.
///
/// ```text
///   create ──▶ Active ──crash──▶ Recovering ──respawn ok──▶ Active
///                 │                   │
///                 └──crash loop──▶ Disabled ◀──respawn failed
/// ```
///
/// `Disabled` is terminal. Destroying a session removes it entirely, so
/// there is no "destroyed" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// A live shell process is attached.
    #[default]
    Active,

    /// The shell crashed and a respawn is scheduled.
    Recovering,

    /// Recovery gave up. Only a fresh `create` brings the terminal back.
    Disabled,
}

impl SessionStatus {
    /// Returns the display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Recovering => "recovering",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Status carried by a recovery notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// A crash was detected and a respawn is scheduled.
    Recovering,
    /// The respawn succeeded; the session is active again.
    Recovered,
    /// The session was permanently disabled.
    Disabled,
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recovering => write!(f, "recovering"),
            Self::Recovered => write!(f, "recovered"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

// ============================================================================
// Terminal Size
// ============================================================================

/// Default terminal width in columns.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height in rows.
pub const DEFAULT_ROWS: u16 = 24;

/// Character-cell dimensions of a pseudo-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    /// Creates a size, rejecting zero dimensions.
    pub fn new(cols: u16, rows: u16) -> DomainResult<Self> {
        if cols == 0 || rows == 0 {
            return Err(DomainError::InvalidFieldValue {
                field: "size".to_string(),
                value: format!("{cols}x{rows}"),
                expected: "non-zero columns and rows".to_string(),
            });
        }
        Ok(Self { cols, rows })
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

// ============================================================================
// Creation Options and Config
// ============================================================================

/// Caller-supplied options for creating a session. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Explicit shell executable, tried before the platform fallbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Working directory. Defaults to the user's home.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,

    /// Extra environment variables, layered over the inherited environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

impl SessionOptions {
    /// Resolves the requested size, applying the 80x24 defaults.
    pub fn size(&self) -> DomainResult<TerminalSize> {
        TerminalSize::new(
            self.cols.unwrap_or(DEFAULT_COLS),
            self.rows.unwrap_or(DEFAULT_ROWS),
        )
    }

    /// Resolves the working directory: explicit, else home, else the
    /// daemon's own current directory.
    pub fn working_directory(&self) -> PathBuf {
        if let Some(cwd) = &self.cwd {
            return cwd.clone();
        }
        dirs::home_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    /// Builds the environment for the child: inherited vars overlaid with
    /// any explicit entries.
    ///
    /// Inherited variables whose name or value is not valid UTF-8 are
    /// left out.
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = std::env::vars_os()
            .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (key, _) => {
                    debug!(var = ?key, "Skipping non UTF-8 environment variable");
                    None
                }
            })
            .collect();
        if let Some(extra) = &self.env {
            env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        env
    }
}

/// Immutable snapshot of how a session's shell was launched.
///
/// Captured once when creation succeeds and reused verbatim by every
/// recovery respawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub shell: String,
    pub cwd: PathBuf,
    pub size: TerminalSize,
    pub env: BTreeMap<String, String>,
}

impl SessionConfig {
    /// Creates a config for one candidate shell from resolved options.
    pub fn from_options(shell: impl Into<String>, options: &SessionOptions) -> DomainResult<Self> {
        Ok(Self {
            shell: shell.into(),
            cwd: options.working_directory(),
            size: options.size()?,
            env: options.environment(),
        })
    }

    /// Returns a copy with a different terminal size.
    #[must_use]
    pub fn with_size(&self, size: TerminalSize) -> Self {
        Self {
            size,
            ..self.clone()
        }
    }
}

// ============================================================================
// Session View
// ============================================================================

/// Read-only snapshot of a session, suitable for listing over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,

    /// Short ID for display (first 8 chars)
    pub id_short: String,

    pub shell: String,

    pub cwd: String,

    pub cols: u16,

    pub rows: u16,

    pub status: SessionStatus,

    /// Number of recovery respawns performed so far
    pub crash_count: u32,

    /// OS process id of the current shell, when the platform reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Session start time (ISO 8601)
    pub started_at: String,

    /// Last output or input time (ISO 8601)
    pub last_activity: String,

    /// Time since last activity (formatted)
    pub last_activity_display: String,
}

impl SessionView {
    /// Builds a view from the pieces a session record holds.
    pub fn new(
        id: &SessionId,
        config: &SessionConfig,
        status: SessionStatus,
        crash_count: u32,
        pid: Option<u32>,
        started_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> Self {
        let since_activity = Utc::now().signed_duration_since(last_activity);
        Self {
            id: id.clone(),
            id_short: id.short().to_string(),
            shell: config.shell.clone(),
            cwd: config.cwd.to_string_lossy().into_owned(),
            cols: config.size.cols,
            rows: config.size.rows,
            status,
            crash_count,
            pid,
            started_at: started_at.to_rfc3339(),
            last_activity: last_activity.to_rfc3339(),
            last_activity_display: format_duration(since_activity),
        }
    }
}

/// Formats a duration for human-readable display.
fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds();
    if secs < 1 {
        return "now".to_string();
    }
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        let mins = secs / 60;
        format!("{mins}m ago")
    } else if secs < 86400 {
        let hours = secs / 3600;
        format!("{hours}h ago")
    } else {
        let days = secs / 86400;
        format!("{days}d ago")
    }
}
