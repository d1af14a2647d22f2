//! Sliding-window crash history used to detect crash loops.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use termhost_core::SessionId;

/// Default length of the crash window.
pub const DEFAULT_CRASH_WINDOW: Duration = Duration::from_secs(60);

/// Default number of crashes within the window that counts as a loop.
pub const DEFAULT_CRASH_THRESHOLD: usize = 5;

/// Per-session crash timestamps, pruned to a trailing window.
#[derive(Debug, Clone)]
pub struct CrashTracker {
    window: Duration,
    threshold: usize,
    history: HashMap<SessionId, VecDeque<Instant>>,
}

impl Default for CrashTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CRASH_WINDOW, DEFAULT_CRASH_THRESHOLD)
    }
}

impl CrashTracker {
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            history: HashMap::new(),
        }
    }

    /// Records a crash now.
    pub fn record_crash(&mut self, id: &SessionId) {
        self.record_crash_at(id, Instant::now());
    }

    pub fn record_crash_at(&mut self, id: &SessionId, now: Instant) {
        let window = self.window;
        let crashes = self.history.entry(id.clone()).or_default();
        crashes.push_back(now);
        prune(crashes, window, now);
    }

    /// Returns true if the session crashed `threshold` or more times within
    /// the window ending now.
    pub fn is_in_crash_loop(&mut self, id: &SessionId) -> bool {
        self.is_in_crash_loop_at(id, Instant::now())
    }

    pub fn is_in_crash_loop_at(&mut self, id: &SessionId, now: Instant) -> bool {
        self.crash_count_at(id, now) >= self.threshold
    }

    /// Crashes currently inside the window.
    pub fn crash_count_in_window(&mut self, id: &SessionId) -> usize {
        self.crash_count_at(id, Instant::now())
    }

    fn crash_count_at(&mut self, id: &SessionId, now: Instant) -> usize {
        let window = self.window;
        match self.history.get_mut(id) {
            Some(crashes) => {
                prune(crashes, window, now);
                crashes.len()
            }
            None => 0,
        }
    }

    /// Forgets all crashes for a session.
    pub fn clear(&mut self, id: &SessionId) {
        self.history.remove(id);
    }

    /// Number of sessions with any recorded history.
    pub fn tracked_sessions(&self) -> usize {
        self.history.len()
    }
}

/// Drops timestamps older than `window` before `now`.
fn prune(crashes: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(oldest) = crashes.front() {
        if now.saturating_duration_since(*oldest) > window {
            crashes.pop_front();
        } else {
            break;
        }
    }
}
