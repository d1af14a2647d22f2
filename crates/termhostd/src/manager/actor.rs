//! Session manager actor - owns every session and supervises its shell.
//!
//! The actor is the single owner of session state. Client requests, process
//! lifecycle events and recovery timers all arrive on one mpsc channel and
//! are handled one at a time, so a store mutation always completes before
//! the next command is looked at.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply channel send failures are ignored (the caller went away)
//! - Kill failures on teardown are logged and otherwise ignored

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use termhost_core::{
    candidate_shells, Platform, RecoveryStatus, SessionConfig, SessionId, SessionOptions,
    SessionStatus, SessionView, TerminalSize, DEFAULT_COLS, DEFAULT_ROWS,
};

use super::commands::{ManagerCommand, ManagerError, TerminalEvent};
use super::crash::{CrashTracker, DEFAULT_CRASH_THRESHOLD, DEFAULT_CRASH_WINDOW};
use super::sink::EventSink;
use super::store::{SessionRecord, SessionStore};
use crate::pty::{ProcessEvent, ProcessListener, PtySpawner, SpawnError};

// ============================================================================
// Limits and Defaults
// ============================================================================

/// Maximum number of concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// Delay between a crash and the respawn attempt.
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_secs(1);

/// Tunables for the manager actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub max_sessions: usize,
    pub crash_window: Duration,
    pub crash_threshold: usize,
    pub recovery_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            crash_window: DEFAULT_CRASH_WINDOW,
            crash_threshold: DEFAULT_CRASH_THRESHOLD,
            recovery_delay: DEFAULT_RECOVERY_DELAY,
        }
    }
}

// ============================================================================
// Session Manager Actor
// ============================================================================

/// The session manager actor.
///
/// # Ownership
///
/// The actor owns:
/// - `store`: every live session record, including its process handle
/// - `crashes`: per-session crash history for crash-loop detection
///
/// Process reader/waiter threads and recovery timers only ever talk to the
/// actor through its command channel.
///
/// # Process generations
///
/// Every spawn gets a fresh generation number and its listener tags events
/// with it. When a process is released (recovery respawn or destroy) the
/// record moves on to a new generation or disappears, so late events from
/// the old process are dropped.
pub struct SessionManager {
    /// Command receiver
    receiver: mpsc::Receiver<ManagerCommand>,

    /// Sender side of our own channel, handed to listeners and timers.
    /// Weak so the actor stops once every handle is dropped.
    commands: mpsc::WeakSender<ManagerCommand>,

    store: SessionStore,

    crashes: CrashTracker,

    spawner: Arc<dyn PtySpawner>,

    /// Notification destination shared by all sessions
    sink: Box<dyn EventSink>,

    config: ManagerConfig,

    platform: Platform,

    next_generation: u64,
}

impl SessionManager {
    /// Creates a new manager actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `sender` - Sender of the same channel, used for lifecycle events
    /// * `spawner` - Starts shell processes
    /// * `sink` - Destination for terminal notifications
    /// * `config` - Limits and recovery tunables
    pub fn new(
        receiver: mpsc::Receiver<ManagerCommand>,
        sender: &mpsc::Sender<ManagerCommand>,
        spawner: Arc<dyn PtySpawner>,
        sink: Box<dyn EventSink>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            receiver,
            commands: sender.downgrade(),
            store: SessionStore::new(),
            crashes: CrashTracker::new(config.crash_window, config.crash_threshold),
            spawner,
            sink,
            config,
            platform: Platform::current(),
            next_generation: 0,
        }
    }

    /// Overrides the platform used to pick fallback shells.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Runs the actor event loop until every sender is dropped.
    pub async fn run(mut self) {
        info!(
            platform = %self.platform,
            max_sessions = self.config.max_sessions,
            "Session manager starting"
        );

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        // Every handle dropped without a cleanup request.
        let orphaned = self.handle_cleanup();
        info!(orphaned, "Session manager stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Create {
                options,
                respond_to,
            } => {
                let result = self.handle_create(*options);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            ManagerCommand::Write {
                session_id,
                data,
                respond_to,
            } => {
                let result = self.handle_write(&session_id, &data);
                let _ = respond_to.send(result);
            }
            ManagerCommand::Resize {
                session_id,
                cols,
                rows,
                respond_to,
            } => {
                let result = self.handle_resize(&session_id, cols, rows);
                let _ = respond_to.send(result);
            }
            ManagerCommand::Destroy {
                session_id,
                respond_to,
            } => {
                self.handle_destroy(&session_id);
                let _ = respond_to.send(());
            }
            ManagerCommand::GetSession {
                session_id,
                respond_to,
            } => {
                let result = self.handle_get_session(&session_id);
                let _ = respond_to.send(result);
            }
            ManagerCommand::ListSessions { respond_to } => {
                let _ = respond_to.send(self.handle_list_sessions());
            }
            ManagerCommand::Cleanup { respond_to } => {
                let _ = respond_to.send(self.handle_cleanup());
            }
            ManagerCommand::Process {
                session_id,
                generation,
                event,
            } => {
                self.handle_process_event(session_id, generation, event);
            }
            ManagerCommand::AttemptRecovery { session_id } => {
                self.handle_attempt_recovery(&session_id);
            }
        }
    }

    // ========================================================================
    // Request Handlers
    // ========================================================================

    /// Spawns the first candidate shell that starts and registers it.
    fn handle_create(&mut self, options: SessionOptions) -> Result<SessionId, ManagerError> {
        if self.store.len() >= self.config.max_sessions {
            warn!(
                current = self.store.len(),
                max = self.config.max_sessions,
                "Session limit reached, rejecting create"
            );
            return Err(ManagerError::Capacity {
                max: self.config.max_sessions,
            });
        }

        let template = SessionConfig::from_options(String::new(), &options).map_err(|_| {
            ManagerError::InvalidSize {
                cols: options.cols.unwrap_or(DEFAULT_COLS),
                rows: options.rows.unwrap_or(DEFAULT_ROWS),
            }
        })?;

        let id = SessionId::generate();
        let candidates = candidate_shells(options.shell.as_deref(), self.platform);
        let mut last_error = None;

        for shell in &candidates {
            let config = SessionConfig {
                shell: shell.clone(),
                ..template.clone()
            };
            let generation = self.next_generation();
            let listener = self
                .listener(&id, generation)
                .ok_or(ManagerError::ChannelClosed)?;

            match self.spawner.spawn(&config, listener) {
                Ok(process) => {
                    info!(
                        session_id = %id,
                        shell = %shell,
                        cwd = %config.cwd.display(),
                        size = %config.size,
                        pid = ?process.pid(),
                        "Session created"
                    );
                    self.store
                        .insert(id.clone(), SessionRecord::new(config, process, generation));
                    return Ok(id);
                }
                Err(SpawnError::PermissionDenied { shell, message }) => {
                    warn!(shell = %shell, error = %message, "Permission denied spawning shell");
                    return Err(ManagerError::PermissionDenied { shell, message });
                }
                Err(e) => {
                    warn!(shell = %shell, error = %e, "Shell failed to start, trying next candidate");
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(ManagerError::AllShellsFailed {
            attempted: candidates,
            last_error: last_error.unwrap_or_else(|| "no candidate shells".to_string()),
        })
    }

    fn handle_write(&mut self, id: &SessionId, data: &[u8]) -> Result<(), ManagerError> {
        let record = live_record(&mut self.store, id)?;
        record.process.write(data).map_err(|e| ManagerError::Io {
            session_id: id.clone(),
            message: e.to_string(),
        })?;
        record.touch();
        debug!(session_id = %id, bytes = data.len(), "Forwarded input");
        Ok(())
    }

    fn handle_resize(&mut self, id: &SessionId, cols: u16, rows: u16) -> Result<(), ManagerError> {
        let size = TerminalSize::new(cols, rows).map_err(|_| ManagerError::InvalidSize { cols, rows })?;
        let record = live_record(&mut self.store, id)?;
        record.process.resize(size).map_err(|e| ManagerError::Io {
            session_id: id.clone(),
            message: e.to_string(),
        })?;
        record.size = size;
        debug!(session_id = %id, size = %size, "Resized terminal");
        Ok(())
    }

    /// Tears a session down. Returns false if the id was unknown.
    fn handle_destroy(&mut self, id: &SessionId) -> bool {
        let Some(mut record) = self.remove_session(id) else {
            debug!(session_id = %id, "Destroy for unknown session");
            return false;
        };

        if let Err(e) = record.process.kill() {
            debug!(session_id = %id, error = %e, "Kill failed, shell already gone");
        }
        info!(session_id = %id, "Session destroyed");
        true
    }

    fn handle_get_session(&self, id: &SessionId) -> Option<SessionView> {
        self.store.get(id).map(|record| record.view(id))
    }

    fn handle_list_sessions(&self) -> Vec<SessionView> {
        let mut views: Vec<SessionView> = self
            .store
            .iter()
            .map(|(id, record)| record.view(id))
            .collect();
        views.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        views
    }

    /// Destroys every session. Returns how many were destroyed.
    fn handle_cleanup(&mut self) -> usize {
        let mut destroyed = 0;
        for id in self.store.ids() {
            if self.handle_destroy(&id) {
                destroyed += 1;
            }
        }
        if destroyed > 0 {
            info!(destroyed, "Cleaned up all sessions");
        }
        destroyed
    }

    // ========================================================================
    // Lifecycle Handlers
    // ========================================================================

    fn handle_process_event(&mut self, id: SessionId, generation: u64, event: ProcessEvent) {
        let Some(record) = self.store.get_mut(&id) else {
            debug!(session_id = %id, "Event for removed session ignored");
            return;
        };
        if record.generation != generation {
            debug!(
                session_id = %id,
                generation,
                current = record.generation,
                "Event from released process ignored"
            );
            return;
        }

        match event {
            ProcessEvent::Output(data) => {
                record.touch();
                self.notify(TerminalEvent::Data { id, data });
            }
            ProcessEvent::Exited(code) => {
                self.notify(TerminalEvent::Exit {
                    id: id.clone(),
                    code,
                });
                self.handle_exit(&id, code);
            }
            ProcessEvent::Failed(message) => {
                warn!(session_id = %id, error = %message, "Shell process failed");
                self.handle_crash(&id);
            }
        }
    }

    fn handle_exit(&mut self, id: &SessionId, code: Option<i32>) {
        match code {
            Some(code) if code != 0 => {
                warn!(session_id = %id, code, "Shell exited abnormally");
                self.handle_crash(id);
            }
            _ => {
                info!(session_id = %id, code = ?code, "Shell exited, removing session");
                self.remove_session(id);
            }
        }
    }

    /// Records a crash and either schedules recovery or disables the session.
    fn handle_crash(&mut self, id: &SessionId) {
        match self.store.get(id).map(|record| record.status) {
            Some(SessionStatus::Active) => {}
            Some(status) => {
                debug!(session_id = %id, status = %status, "Crash on non-active session ignored");
                return;
            }
            None => return,
        }

        self.crashes.record_crash(id);
        if self.crashes.is_in_crash_loop(id) {
            self.disable(id, "crash loop detected");
            return;
        }

        let Some(task) = self.schedule_recovery(id) else {
            self.disable(id, "manager shutting down");
            return;
        };
        if let Some(record) = self.store.get_mut(id) {
            record.status = SessionStatus::Recovering;
            record.recovery_task = Some(task);
        }

        info!(
            session_id = %id,
            crashes = self.crashes.crash_count_in_window(id),
            delay_ms = self.config.recovery_delay.as_millis() as u64,
            "Scheduling recovery"
        );
        self.notify(TerminalEvent::Recovery {
            id: id.clone(),
            status: RecoveryStatus::Recovering,
        });
    }

    /// Respawns a recovering session's shell with its stored config.
    fn handle_attempt_recovery(&mut self, id: &SessionId) {
        let generation = self.next_generation();
        let listener = self.listener(id, generation);

        let outcome = {
            let Some(record) = self.store.get_mut(id) else {
                debug!(session_id = %id, "Recovery fired for removed session");
                return;
            };
            record.recovery_task = None;
            if record.status != SessionStatus::Recovering {
                debug!(session_id = %id, status = %record.status, "Recovery no longer needed");
                return;
            }

            // Release the old process before its replacement exists.
            record.generation = generation;
            if let Err(e) = record.process.kill() {
                debug!(session_id = %id, error = %e, "Old shell already gone");
            }

            match listener {
                Some(listener) => match self.spawner.spawn(&record.config, listener) {
                    Ok(process) => {
                        record.process = process;
                        record.size = record.config.size;
                        record.crash_count = record.crash_count.saturating_add(1);
                        record.status = SessionStatus::Active;
                        record.touch();
                        Ok(record.crash_count)
                    }
                    Err(e) => Err(e.to_string()),
                },
                None => Err("manager shutting down".to_string()),
            }
        };

        match outcome {
            Ok(crash_count) => {
                info!(session_id = %id, crash_count, "Session recovered");
                self.notify(TerminalEvent::Recovery {
                    id: id.clone(),
                    status: RecoveryStatus::Recovered,
                });
            }
            Err(reason) => self.disable(id, &reason),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn disable(&mut self, id: &SessionId, reason: &str) {
        if let Some(record) = self.store.get_mut(id) {
            record.status = SessionStatus::Disabled;
            if let Some(task) = record.recovery_task.take() {
                task.abort();
            }
        }
        warn!(session_id = %id, reason, "Session disabled");
        self.notify(TerminalEvent::Recovery {
            id: id.clone(),
            status: RecoveryStatus::Disabled,
        });
    }

    /// Removes a record together with its timer and crash history.
    fn remove_session(&mut self, id: &SessionId) -> Option<SessionRecord> {
        self.crashes.clear(id);
        let mut record = self.store.remove(id)?;
        if let Some(task) = record.recovery_task.take() {
            task.abort();
        }
        Some(record)
    }

    fn schedule_recovery(&self, id: &SessionId) -> Option<JoinHandle<()>> {
        let sender = self.commands.upgrade()?;
        let delay = self.config.recovery_delay;
        let session_id = id.clone();

        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender
                .send(ManagerCommand::AttemptRecovery { session_id })
                .await;
        }))
    }

    /// `None` once every handle to the manager is gone.
    fn listener(&self, id: &SessionId, generation: u64) -> Option<ProcessListener> {
        self.commands.upgrade()?;
        Some(ProcessListener::new(
            id.clone(),
            generation,
            self.commands.clone(),
        ))
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation = self.next_generation.wrapping_add(1);
        self.next_generation
    }

    /// Pushes a notification unless nobody is listening.
    fn notify(&self, event: TerminalEvent) {
        if self.sink.is_closed() {
            debug!(session_id = %event.session_id(), "No listeners, notification dropped");
            return;
        }
        self.sink.push(event);
    }

    /// Returns the current session count (for testing).
    pub fn session_count(&self) -> usize {
        self.store.len()
    }
}

/// Looks up a session that can still accept input.
fn live_record<'a>(
    store: &'a mut SessionStore,
    id: &SessionId,
) -> Result<&'a mut SessionRecord, ManagerError> {
    let record = store
        .get_mut(id)
        .ok_or_else(|| ManagerError::SessionNotFound(id.clone()))?;
    if record.status == SessionStatus::Disabled {
        return Err(ManagerError::SessionDisabled(id.clone()));
    }
    Ok(record)
}
