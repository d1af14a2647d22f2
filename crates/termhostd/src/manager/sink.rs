//! Destination for terminal notifications.

use tokio::sync::broadcast;

use super::commands::TerminalEvent;

/// Where the manager pushes data, exit and recovery notifications.
///
/// The manager checks [`EventSink::is_closed`] before every push and skips
/// the push when nobody is listening.
pub trait EventSink: Send + Sync {
    /// Returns true once the receiving side has gone away.
    fn is_closed(&self) -> bool;

    fn push(&self, event: TerminalEvent);
}

impl EventSink for broadcast::Sender<TerminalEvent> {
    fn is_closed(&self) -> bool {
        self.receiver_count() == 0
    }

    fn push(&self, event: TerminalEvent) {
        // Only fails when every receiver dropped between the check and here.
        let _ = self.send(event);
    }
}
