//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Validates session requests before they reach the manager
//! - Routes requests to the session manager and answers with `response`
//! - Registers the client for data/exit/recovery notifications on `subscribe`
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Malformed lines are answered with an error and the connection stays open
//! - I/O errors result in graceful disconnect

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use termhost_core::SessionId;
use termhost_protocol::{
    ClientMessage, DaemonMessage, MessageType, ProtocolVersion, Request, RequestKind,
};

use crate::manager::ManagerHandle;

/// Type alias for subscriber writer handle
pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Information about a subscribed client
pub struct Subscriber {
    /// Writer for sending notifications
    pub writer: SubscriberWriter,

    /// Only notifications for this session are sent, if set
    pub filter: Option<SessionId>,
}

impl Subscriber {
    pub fn wants(&self, session_id: &SessionId) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter == session_id)
    }
}

/// Type alias for the subscribers map
pub type SubscribersMap = Arc<RwLock<HashMap<String, Subscriber>>>;

/// Maximum number of concurrent subscribers
pub const MAX_SUBSCRIBERS: usize = 16;

/// Maximum message size (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Idle timeout for clients that are not subscribed (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
pub(crate) const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Code sent with errors about malformed input.
const INVALID_REQUEST: &str = "invalid_request";

/// Unique identifier for this connection
type ClientId = String;

/// Connection handler for a single client.
pub struct ConnectionHandler {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer, shared with the notification broadcaster
    writer: SubscriberWriter,

    manager: ManagerHandle,

    /// Shared subscribers map for notification fan-out
    subscribers: SubscribersMap,

    /// Client identifier (assigned at handshake)
    client_id: Option<ClientId>,

    subscribed: bool,

    /// Session filter for the subscription (None = all sessions)
    subscription_filter: Option<SessionId>,

    connection_number: u64,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `reader` - Read half of the Unix stream
    /// * `writer` - Write half of the Unix stream
    /// * `manager` - Handle to the session manager
    /// * `subscribers` - Shared map of notification subscribers
    /// * `connection_number` - Unique number for this connection
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        manager: ManagerHandle,
        subscribers: SubscribersMap,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            manager,
            subscribers,
            client_id: None,
            subscribed: false,
            subscription_filter: None,
            connection_number,
        }
    }

    /// Runs the handshake and then the message loop until the client leaves.
    ///
    /// Returns the client id so the server can drop its subscription.
    pub async fn run(mut self) -> Option<ClientId> {
        debug!(connection = self.connection_number, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "Handshake failed"
            );
            return None;
        }
        info!(client_id = ?self.client_id, "Client handshake completed");

        if let Err(e) = self.process_messages().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        info!(client_id = ?self.client_id, "Client disconnected");
        self.client_id
    }

    /// Expects `connect` with a compatible protocol version.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match self.read_message().await? {
            Ok(msg) => msg,
            Err(reason) => {
                self.send_message(DaemonMessage::error_with_code(&reason, INVALID_REQUEST))
                    .await?;
                return Err(ConnectionError::ParseError(reason));
            }
        };

        let client_version = msg.protocol_version;
        if let Err(e) = client_version.ensure_compatible() {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.send_message(DaemonMessage::rejected(&e.to_string()))
                .await?;
            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id))
                    .await
            }
            other => {
                self.send_message(DaemonMessage::error(
                    "Expected connect message for handshake",
                ))
                .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Subscribed clients may legitimately stay silent for hours.
            let next = if self.subscribed {
                self.read_message().await
            } else {
                match timeout(READ_TIMEOUT, self.read_message()).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!(client_id = ?self.client_id, "Connection timed out");
                        return Err(ConnectionError::Timeout);
                    }
                }
            };

            let msg = match next {
                Ok(Ok(msg)) => msg,
                Ok(Err(reason)) => {
                    debug!(client_id = ?self.client_id, error = %reason, "Malformed message");
                    self.send_message(DaemonMessage::error_with_code(&reason, INVALID_REQUEST))
                        .await?;
                    continue;
                }
                Err(ConnectionError::Eof) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            match self.handle_message(msg).await {
                Ok(()) => {}
                Err(ConnectionError::Eof) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected"))
                    .await?;
            }

            message @ (MessageType::Create { .. }
            | MessageType::Write { .. }
            | MessageType::Resize { .. }
            | MessageType::Destroy { .. }) => {
                let response = self.handle_request(message).await;
                self.send_message(response).await?;
            }

            MessageType::ListSessions => {
                let sessions = self.manager.list_sessions().await;
                self.send_message(DaemonMessage::session_list(sessions))
                    .await?;
            }

            MessageType::Subscribe { session_id } => {
                self.handle_subscribe(session_id).await?;
            }

            MessageType::Unsubscribe => {
                if let Some(ref client_id) = self.client_id {
                    self.subscribers.write().await.remove(client_id);
                }
                self.subscribed = false;
                self.subscription_filter = None;
                debug!(client_id = ?self.client_id, "Client unsubscribed");
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    /// Validates and executes a session request, producing its response.
    async fn handle_request(&self, message: MessageType) -> DaemonMessage {
        let Some(kind) = RequestKind::of(&message) else {
            return DaemonMessage::error_with_code("not a session request", INVALID_REQUEST);
        };

        let request = match Request::try_from(message) {
            Ok(request) => request,
            Err(e) => {
                debug!(client_id = ?self.client_id, request = %kind, error = %e, "Rejected request");
                return DaemonMessage::failure(kind, &e.to_string(), e.code());
            }
        };

        let result = match request {
            Request::Create(options) => self.manager.create(options).await.map(Some),
            Request::Write { id, data } => self
                .manager
                .write(&id, data.into_bytes())
                .await
                .map(|()| None),
            Request::Resize { id, size } => self
                .manager
                .resize(&id, size.cols, size.rows)
                .await
                .map(|()| None),
            Request::Destroy { id } => {
                if let Err(e) = self.manager.destroy(&id).await {
                    warn!(session_id = %id, error = %e, "Destroy did not reach the manager");
                }
                Ok(None)
            }
        };

        match result {
            Ok(id) => DaemonMessage::success(kind, id),
            Err(e) => {
                debug!(client_id = ?self.client_id, request = %kind, error = %e, "Request failed");
                DaemonMessage::failure(kind, &e.to_string(), e.code())
            }
        }
    }

    async fn handle_subscribe(&mut self, session_id: Option<SessionId>) -> Result<(), ConnectionError> {
        let Some(client_id) = self.client_id.clone() else {
            return self
                .send_message(DaemonMessage::error("Must connect before subscribing"))
                .await;
        };

        {
            let mut subs = self.subscribers.write().await;
            if subs.len() >= MAX_SUBSCRIBERS && !subs.contains_key(&client_id) {
                drop(subs);
                return self
                    .send_message(DaemonMessage::error_with_code(
                        &format!("Too many subscribers (max: {MAX_SUBSCRIBERS})"),
                        "capacity",
                    ))
                    .await;
            }
            subs.insert(
                client_id.clone(),
                Subscriber {
                    writer: Arc::clone(&self.writer),
                    filter: session_id.clone(),
                },
            );
        }

        self.subscribed = true;
        self.subscription_filter = session_id;
        debug!(
            client_id = %client_id,
            filter = ?self.subscription_filter,
            "Client subscribed to notifications"
        );

        // Current sessions as initial state
        let sessions = self.manager.list_sessions().await;
        self.send_message(DaemonMessage::session_list(sessions))
            .await
    }

    /// Reads one line.
    ///
    /// The outer error is fatal for the connection. The inner error is a
    /// line that could not be parsed and should be answered.
    async fn read_message(&mut self) -> Result<Result<ClientMessage, String>, ConnectionError> {
        let mut line = String::new();
        let limit = (MAX_MESSAGE_SIZE + 1) as u64;

        let bytes_read = (&mut self.reader)
            .take(limit)
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        match serde_json::from_str::<ClientMessage>(&line) {
            Ok(msg) => {
                debug!(
                    client_id = ?self.client_id,
                    message_type = ?std::mem::discriminant(&msg.message),
                    "Received message"
                );
                Ok(Ok(msg))
            }
            Err(e) => Ok(Err(format!("Parse error: {e}"))),
        }
    }

    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;
        write_line(&self.writer, &json).await
    }
}

/// Writes one JSON line to a shared writer, bounded by the write timeout.
pub(crate) async fn write_line(writer: &SubscriberWriter, json: &str) -> Result<(), ConnectionError> {
    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}
