//! Keyed storage of live session records.
//!
//! The store holds no policy; the actor decides what goes in and out.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use termhost_core::{SessionConfig, SessionId, SessionStatus, SessionView, TerminalSize};

use crate::pty::PtyProcess;

/// Everything the manager tracks for one session.
pub struct SessionRecord {
    /// Launch parameters captured at creation.
    pub config: SessionConfig,

    /// Current terminal size; starts at `config.size` and follows resizes.
    pub size: TerminalSize,

    /// Handle to the current shell process.
    pub process: Box<dyn PtyProcess>,

    pub status: SessionStatus,

    /// Recovery respawns performed so far.
    pub crash_count: u32,

    /// Generation of `process`. Events tagged with any other value are stale.
    pub generation: u64,

    /// Pending recovery timer, aborted on destroy.
    pub recovery_task: Option<JoinHandle<()>>,

    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(config: SessionConfig, process: Box<dyn PtyProcess>, generation: u64) -> Self {
        let now = Utc::now();
        Self {
            size: config.size,
            config,
            process,
            status: SessionStatus::Active,
            crash_count: 0,
            generation,
            recovery_task: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn view(&self, id: &SessionId) -> SessionView {
        SessionView::new(
            id,
            &self.config.with_size(self.size),
            self.status,
            self.crash_count,
            self.process.pid(),
            self.created_at,
            self.last_activity,
        )
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("shell", &self.config.shell)
            .field("status", &self.status)
            .field("crash_count", &self.crash_count)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Map from session id to record.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<SessionId, SessionRecord>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, returning any record previously stored under `id`.
    pub fn insert(&mut self, id: SessionId, record: SessionRecord) -> Option<SessionRecord> {
        self.sessions.insert(id, record)
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionRecord> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut SessionRecord> {
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<SessionRecord> {
        self.sessions.remove(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of the current ids, safe to iterate while removing.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &SessionRecord)> {
        self.sessions.iter()
    }
}
