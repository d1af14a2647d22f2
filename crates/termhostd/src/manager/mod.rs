//! Session lifecycle manager using the actor pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  ManagerCommand   ┌──────────────────┐  TerminalEvent  ┌──────────────────┐
//! │  ManagerHandle   │──────────────────▶│  SessionManager  │────────────────▶│ broadcast::Sender│
//! └──────────────────┘   (mpsc)          └──────────────────┘   (EventSink)   └──────────────────┘
//!                                          ▲     │      ▲
//!          pty reader/waiter threads ──────┘     │      └────── recovery timers
//!          (Process events)                      ▼              (AttemptRecovery)
//!                                    SessionStore + CrashTracker
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::pty::{NativePtySpawner, PtySpawner};

mod actor;
mod commands;
pub mod crash;
mod handle;
pub mod sink;
pub mod store;

pub use actor::{ManagerConfig, SessionManager, DEFAULT_MAX_SESSIONS, DEFAULT_RECOVERY_DELAY};
pub use commands::{ManagerCommand, ManagerError, TerminalEvent};
pub use crash::CrashTracker;
pub use handle::ManagerHandle;
pub use sink::EventSink;
pub use store::{SessionRecord, SessionStore};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 1024;

/// Spawns the manager actor backed by native pseudo-terminals.
///
/// # Example
///
/// ```no_run
/// use termhost_core::SessionOptions;
/// use termhostd::manager::{spawn_manager, ManagerConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_manager(ManagerConfig::default());
///     let _id = handle.create(SessionOptions::default()).await;
/// }
/// ```
pub fn spawn_manager(config: ManagerConfig) -> ManagerHandle {
    spawn_manager_with(config, Arc::new(NativePtySpawner))
}

/// Spawns the manager actor with a custom process spawner.
pub fn spawn_manager_with(config: ManagerConfig, spawner: Arc<dyn PtySpawner>) -> ManagerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = SessionManager::new(cmd_rx, &cmd_tx, spawner, Box::new(event_tx.clone()), config);
    tokio::spawn(actor.run());

    ManagerHandle::new(cmd_tx, event_tx)
}
