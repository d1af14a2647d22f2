//! Shared fakes for the integration tests.
//!
//! `EchoSpawner` hands out processes that echo every write back as output,
//! and keeps each process's listener so a test can make it exit or crash.

#![allow(dead_code)]

pub mod server;

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use termhost_core::{SessionConfig, SessionId, TerminalSize};
use termhostd::manager::TerminalEvent;
use termhostd::pty::{ProcessEvent, ProcessListener, PtyProcess, PtySpawner, SpawnError};
use tokio::sync::broadcast;

/// Upper bound for any single wait on an event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct ProcessLog {
    pub writes: Vec<Vec<u8>>,
    pub resizes: Vec<TerminalSize>,
    pub kills: usize,
}

struct EchoProcess {
    listener: ProcessListener,
    log: Arc<Mutex<ProcessLog>>,
}

impl PtyProcess for EchoProcess {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.log.lock().unwrap().writes.push(data.to_vec());
        let listener = self.listener.clone();
        let output = String::from_utf8_lossy(data).into_owned();
        tokio::spawn(async move {
            listener.emit(ProcessEvent::Output(output)).await;
        });
        Ok(())
    }

    fn resize(&mut self, size: TerminalSize) -> io::Result<()> {
        self.log.lock().unwrap().resizes.push(size);
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.log.lock().unwrap().kills += 1;
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(1000)
    }
}

pub struct Spawned {
    pub config: SessionConfig,
    pub listener: ProcessListener,
    pub log: Arc<Mutex<ProcessLog>>,
}

#[derive(Default)]
struct State {
    broken_shells: HashSet<String>,
    fail_all: bool,
    spawned: Vec<Spawned>,
}

#[derive(Clone, Default)]
pub struct EchoSpawner {
    state: Arc<Mutex<State>>,
}

impl EchoSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later spawn of `shell` fail as if the binary were missing.
    pub fn break_shell(&self, shell: &str) {
        self.state.lock().unwrap().broken_shells.insert(shell.to_string());
    }

    pub fn fail_all(&self, fail: bool) {
        self.state.lock().unwrap().fail_all = fail;
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().unwrap().spawned.len()
    }

    pub fn shells(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.spawned.iter().map(|s| s.config.shell.clone()).collect()
    }

    pub fn config(&self, index: usize) -> SessionConfig {
        self.state.lock().unwrap().spawned[index].config.clone()
    }

    pub fn kills(&self, index: usize) -> usize {
        self.state.lock().unwrap().spawned[index].log.lock().unwrap().kills
    }

    pub fn listener(&self, index: usize) -> ProcessListener {
        self.state.lock().unwrap().spawned[index].listener.clone()
    }

    pub fn last_listener(&self) -> ProcessListener {
        let state = self.state.lock().unwrap();
        state.spawned.last().unwrap().listener.clone()
    }

    /// Makes the most recently spawned process exit with `code`.
    pub async fn exit_last(&self, code: Option<i32>) {
        let listener = self.last_listener();
        assert!(listener.emit(ProcessEvent::Exited(code)).await);
    }
}

impl PtySpawner for EchoSpawner {
    fn spawn(
        &self,
        config: &SessionConfig,
        listener: ProcessListener,
    ) -> Result<Box<dyn PtyProcess>, SpawnError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_all || state.broken_shells.contains(&config.shell) {
            return Err(SpawnError::NotFound {
                shell: config.shell.clone(),
            });
        }
        let log = Arc::new(Mutex::new(ProcessLog::default()));
        state.spawned.push(Spawned {
            config: config.clone(),
            listener: listener.clone(),
            log: Arc::clone(&log),
        });
        Ok(Box::new(EchoProcess { listener, log }))
    }
}

/// Receives events until one matches, failing after [`EVENT_TIMEOUT`].
pub async fn next_matching(
    events: &mut broadcast::Receiver<TerminalEvent>,
    mut matches: impl FnMut(&TerminalEvent) -> bool,
) -> TerminalEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Waits for the next recovery notification for `id`.
pub async fn next_recovery(
    events: &mut broadcast::Receiver<TerminalEvent>,
    id: &SessionId,
) -> termhost_core::RecoveryStatus {
    match next_matching(events, |e| {
        matches!(e, TerminalEvent::Recovery { id: rid, .. } if rid == id)
    })
    .await
    {
        TerminalEvent::Recovery { status, .. } => status,
        other => panic!("Expected recovery event, got {other:?}"),
    }
}
