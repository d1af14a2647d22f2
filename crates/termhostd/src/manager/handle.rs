//! Client interface for interacting with the SessionManager actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `ManagerError::ChannelClosed`

use tokio::sync::{broadcast, mpsc, oneshot};

use termhost_core::{SessionId, SessionOptions, SessionView};

use super::commands::{ManagerCommand, ManagerError, TerminalEvent};

/// Cheap-to-clone handle to the manager actor.
///
/// ```ignore
/// let id = handle.create(SessionOptions::default()).await?;
/// handle.write(&id, "ls\n").await?;
///
/// let mut events = handle.subscribe();
/// while let Ok(event) = events.recv().await {
///     // Data / Exit / Recovery
/// }
/// ```
#[derive(Clone)]
pub struct ManagerHandle {
    sender: mpsc::Sender<ManagerCommand>,
    event_sender: broadcast::Sender<TerminalEvent>,
}

impl ManagerHandle {
    pub fn new(
        sender: mpsc::Sender<ManagerCommand>,
        event_sender: broadcast::Sender<TerminalEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, ManagerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| ManagerError::ChannelClosed)?;
        rx.await.map_err(|_| ManagerError::ChannelClosed)
    }

    /// Spawns a shell and returns the new session's id.
    ///
    /// # Errors
    ///
    /// - `ManagerError::PermissionDenied` if the OS refused to start a shell
    /// - `ManagerError::AllShellsFailed` if no candidate shell could start
    /// - `ManagerError::Capacity` at the session limit
    /// - `ManagerError::InvalidSize` for zero columns or rows
    /// - `ManagerError::ChannelClosed` if the actor has shut down
    pub async fn create(&self, options: SessionOptions) -> Result<SessionId, ManagerError> {
        self.request(|respond_to| ManagerCommand::Create {
            options: Box::new(options),
            respond_to,
        })
        .await?
    }

    /// Forwards raw input to a session.
    ///
    /// # Errors
    ///
    /// - `ManagerError::SessionNotFound` for an unknown id
    /// - `ManagerError::SessionDisabled` if the session was disabled
    /// - `ManagerError::ChannelClosed` if the actor has shut down
    pub async fn write(
        &self,
        session_id: &SessionId,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), ManagerError> {
        let data = data.into();
        self.request(|respond_to| ManagerCommand::Write {
            session_id: session_id.clone(),
            data,
            respond_to,
        })
        .await?
    }

    /// Changes a session's terminal size.
    pub async fn resize(
        &self,
        session_id: &SessionId,
        cols: u16,
        rows: u16,
    ) -> Result<(), ManagerError> {
        self.request(|respond_to| ManagerCommand::Resize {
            session_id: session_id.clone(),
            cols,
            rows,
            respond_to,
        })
        .await?
    }

    /// Destroys a session. Unknown ids succeed.
    ///
    /// # Errors
    ///
    /// - `ManagerError::ChannelClosed` if the actor has shut down
    pub async fn destroy(&self, session_id: &SessionId) -> Result<(), ManagerError> {
        self.request(|respond_to| ManagerCommand::Destroy {
            session_id: session_id.clone(),
            respond_to,
        })
        .await
    }

    /// Returns `None` if the session doesn't exist or the actor has stopped.
    pub async fn get_session(&self, session_id: &SessionId) -> Option<SessionView> {
        self.request(|respond_to| ManagerCommand::GetSession {
            session_id: session_id.clone(),
            respond_to,
        })
        .await
        .ok()
        .flatten()
    }

    /// Returns an empty vector if the actor has stopped.
    pub async fn list_sessions(&self) -> Vec<SessionView> {
        self.request(|respond_to| ManagerCommand::ListSessions { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Destroys every session and returns how many were live.
    ///
    /// Safe to call repeatedly; later calls return 0.
    pub async fn cleanup(&self) -> Result<usize, ManagerError> {
        self.request(|respond_to| ManagerCommand::Cleanup { respond_to })
            .await
    }

    /// Subscribes to data, exit and recovery notifications for all sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.event_sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_sender.receiver_count()
    }

    /// Returns true if the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for ManagerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerHandle")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
