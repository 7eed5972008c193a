//! TCP client for the game server.
//!
//! One reader task decodes server lines into an unbounded inbound queue; one
//! writer task owns the write half and sends whole lines, so concurrent
//! `send` calls never interleave on the wire. The foreground drains the
//! inbound queue whenever it likes.

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use tabletop_domain::ClientId;
use tabletop_shared::{
    decode_server_line, encode_line, ClientMessage, ServerMessage, MAX_SERVER_LINE_BYTES,
    PROTOCOL_VERSION,
};

/// Connection state, shared with the reader and writer tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected to the server
    Disconnected,
    /// Attempting to establish connection
    Connecting,
    /// Successfully connected
    Connected,
    /// The last connection attempt failed
    Failed,
}

impl ConnectionState {
    /// Convert to u8 for atomic storage.
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Failed => 3,
        }
    }

    /// Convert from u8 (atomic storage).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Timed out connecting to {addr} after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("Could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Channels and tasks of one live connection
struct Link {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<ServerMessage>,
    cancel: CancellationToken,
}

pub struct GameClient {
    client_id: ClientId,
    name: String,
    protocol_version: u32,
    /// Longer server lines are skipped
    max_line_bytes: usize,
    state: Arc<AtomicU8>,
    link: Option<Link>,
}

impl GameClient {
    /// A disconnected client with a fresh 8-character client id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            client_id: ClientId::new(),
            name: name.into(),
            protocol_version: PROTOCOL_VERSION,
            max_line_bytes: MAX_SERVER_LINE_BYTES,
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected.to_u8())),
            link: None,
        }
    }

    /// Announce a different protocol version in `join`, e.g. to check how a
    /// server treats older or newer clients.
    pub fn with_protocol_version(mut self, protocol_version: u32) -> Self {
        self.protocol_version = protocol_version;
        self
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Connects to `addr` (`host:port`) within `timeout`, starts the reader
    /// and writer tasks and sends `join`. Any previous connection is closed
    /// first.
    pub async fn connect(&mut self, addr: &str, timeout: Duration) -> Result<(), ClientError> {
        self.disconnect();
        self.set_state(ConnectionState::Connecting);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                tracing::warn!(addr = %addr, error = %source, "Failed to connect to server");
                self.set_state(ConnectionState::Failed);
                return Err(ClientError::Connect {
                    addr: addr.to_string(),
                    source,
                });
            }
            Err(_) => {
                tracing::warn!(addr = %addr, ?timeout, "Timed out connecting to server");
                self.set_state(ConnectionState::Failed);
                return Err(ClientError::Timeout {
                    addr: addr.to_string(),
                    timeout,
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Could not disable Nagle");
        }

        let (read_half, write_half) = stream.into_split();
        let cancel = CancellationToken::new();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_loop(
            read_half,
            self.max_line_bytes,
            inbound_tx,
            Arc::clone(&self.state),
            cancel.clone(),
        ));
        tokio::spawn(write_loop(
            write_half,
            outbound_rx,
            Arc::clone(&self.state),
            cancel.clone(),
        ));

        self.link = Some(Link {
            outbound,
            inbound,
            cancel,
        });
        self.set_state(ConnectionState::Connected);
        tracing::info!(addr = %addr, client_id = %self.client_id, "Connected to server");

        self.send(ClientMessage::join(
            self.client_id.as_str(),
            self.name.as_str(),
            self.protocol_version,
        ));
        Ok(())
    }

    /// Queues a message for the writer task. Never blocks; returns `false`
    /// while disconnected.
    pub fn send(&self, msg: ClientMessage) -> bool {
        if !self.is_connected() {
            return false;
        }
        match &self.link {
            Some(link) => link.outbound.send(msg).is_ok(),
            None => false,
        }
    }

    /// Everything received so far, oldest first, without waiting.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        if let Some(link) = self.link.as_mut() {
            while let Ok(msg) = link.inbound.try_recv() {
                messages.push(msg);
            }
        }
        messages
    }

    /// Waits for the next message; `None` once the connection is gone and
    /// the queue is empty.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        match self.link.as_mut() {
            Some(link) => link.inbound.recv().await,
            None => None,
        }
    }

    /// Intentional close. Unread messages are discarded.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            link.cancel.cancel();
            tracing::info!(client_id = %self.client_id, "Disconnected from server");
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            link.cancel.cancel();
        }
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    max_line_bytes: usize,
    inbound: mpsc::UnboundedSender<ServerMessage>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
) {
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(max_line_bytes));
    // FramedRead ends the stream once after a decode error; polling again
    // resumes reading past the discarded line.
    let mut resuming = false;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = lines.next() => next,
        };
        match next {
            Some(Ok(line)) => match decode_server_line(&line) {
                Ok(msg) => {
                    if inbound.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "Dropping unreadable server line"),
            },
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::debug!(max_line_bytes, "Dropping oversized server line");
                resuming = true;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                tracing::debug!(error = %e, "Read failed");
                break;
            }
            None if resuming => resuming = false,
            None => {
                tracing::info!("Server closed the connection");
                break;
            }
        }
    }

    state.store(ConnectionState::Disconnected.to_u8(), Ordering::SeqCst);
    cancel.cancel();
}

async fn write_loop(
    write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
) {
    let mut sink = FramedWrite::new(write_half, LinesCodec::new());

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = outbound.recv() => msg,
        };
        let Some(msg) = msg else {
            break;
        };
        let line = match encode_line(&msg) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode message");
                continue;
            }
        };
        if let Err(e) = sink.send(line).await {
            tracing::warn!(error = %e, "Write failed, disconnecting");
            state.store(ConnectionState::Disconnected.to_u8(), Ordering::SeqCst);
            break;
        }
    }

    let _ = SinkExt::<String>::close(&mut sink).await;
    cancel.cancel();
}
