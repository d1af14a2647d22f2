//! Socket-level harness: a DaemonServer on a temp socket plus a line client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use termhost_core::{SessionId, SessionView};
use termhost_protocol::{ClientMessage, DaemonMessage, RequestKind};
use termhostd::manager::{spawn_manager_with, ManagerConfig, ManagerHandle};
use termhostd::server::DaemonServer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::EchoSpawner;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
pub const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
pub const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for server shutdown
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Maximum time to wait for any single message
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
pub struct TestServer {
    pub socket_path: PathBuf,
    pub cancel_token: CancellationToken,
    pub manager: ManagerHandle,
    pub spawner: EchoSpawner,
    _temp_dir: TempDir, // Keep alive for RAII cleanup
}

impl TestServer {
    pub async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("test.sock");

        let spawner = EchoSpawner::new();
        let config = ManagerConfig {
            recovery_delay: Duration::from_millis(20),
            ..ManagerConfig::default()
        };
        let manager = spawn_manager_with(config, Arc::new(spawner.clone()));
        let cancel_token = CancellationToken::new();

        let server = DaemonServer::new(socket_path.clone(), manager.clone(), cancel_token.clone());
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        Self {
            socket_path,
            cancel_token,
            manager,
            spawner,
            _temp_dir: temp_dir,
        }
    }

    pub async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Connects and completes the handshake.
    pub async fn client(&self) -> TestClient {
        let mut client = self.connect().await;
        client.handshake(None).await;
        client
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Test client connection with protocol helpers.
pub struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    pub fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Like `send_raw`, but tolerates the server hanging up mid-write.
    pub async fn try_send_raw(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    pub async fn recv(&mut self) -> DaemonMessage {
        let mut line = String::new();
        timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for message")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Skips messages until one matches.
    pub async fn recv_matching(&mut self, matches: impl Fn(&DaemonMessage) -> bool) -> DaemonMessage {
        loop {
            let msg = self.recv().await;
            if matches(&msg) {
                return msg;
            }
        }
    }

    pub async fn handshake(&mut self, client_id: Option<String>) -> String {
        self.send(ClientMessage::connect(client_id)).await;
        match self.recv().await {
            DaemonMessage::Connected { client_id, .. } => client_id,
            other => panic!("Expected Connected, got {other:?}"),
        }
    }

    /// Sends a create request and returns the new session id.
    pub async fn create(&mut self) -> SessionId {
        self.send(ClientMessage::create_default()).await;
        match self.recv().await {
            DaemonMessage::Response {
                request: RequestKind::Create,
                success: true,
                id: Some(id),
                ..
            } => id,
            other => panic!("Expected successful create response, got {other:?}"),
        }
    }

    /// Subscribes and consumes the initial session list.
    pub async fn subscribe(&mut self, session_id: Option<SessionId>) -> Vec<SessionView> {
        self.send(ClientMessage::subscribe(session_id)).await;
        match self.recv().await {
            DaemonMessage::SessionList { sessions } => sessions,
            other => panic!("Expected SessionList, got {other:?}"),
        }
    }
}

pub fn assert_failure(msg: DaemonMessage, expected_request: RequestKind, expected_code: &str) {
    match msg {
        DaemonMessage::Response {
            request,
            success: false,
            code,
            error,
            ..
        } => {
            assert_eq!(request, expected_request);
            assert_eq!(code.as_deref(), Some(expected_code));
            assert!(error.is_some());
        }
        other => panic!("Expected failed {expected_request} response, got {other:?}"),
    }
}
