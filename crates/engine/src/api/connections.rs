//! Connection management for TCP clients.
//!
//! Tracks every open socket, which of them have joined the session, and the
//! bounded outbound channel feeding each connection's writer task.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use tabletop_domain::ClientId;
use tabletop_shared::ServerMessage;

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Socket open, no identity yet
    Connected,
    /// Identity bound; receives broadcasts
    Joined,
    /// Removed from the registry
    Closed,
}

/// Information about a connected client.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Server-generated id for this socket
    pub connection_id: ClientId,
    /// Identity announced in `join` (the connection id when none was given)
    pub client_id: Option<ClientId>,
    /// Display name used as the default chat sender
    pub name: String,
    pub peer: SocketAddr,
    pub phase: ConnectionPhase,
}

impl ConnectionInfo {
    pub fn is_joined(&self) -> bool {
        self.phase == ConnectionPhase::Joined
    }
}

/// Manages all active connections.
pub struct ConnectionManager {
    /// Map of connection_id -> (ConnectionInfo, sender channel)
    connections: RwLock<HashMap<ClientId, (ConnectionInfo, mpsc::Sender<ServerMessage>)>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a freshly accepted socket.
    pub async fn register(
        &self,
        connection_id: ClientId,
        peer: SocketAddr,
        sender: mpsc::Sender<ServerMessage>,
    ) {
        let info = ConnectionInfo {
            connection_id: connection_id.clone(),
            client_id: None,
            name: String::new(),
            peer,
            phase: ConnectionPhase::Connected,
        };
        let mut connections = self.connections.write().await;
        connections.insert(connection_id.clone(), (info, sender));
        tracing::debug!(connection_id = %connection_id, peer = %peer, "Connection registered");
    }

    /// Unregister a connection. Dropping its sender lets the writer task
    /// flush what is already queued and exit.
    pub async fn unregister(&self, connection_id: &ClientId) -> Option<ConnectionInfo> {
        let mut connections = self.connections.write().await;
        let (mut info, _) = connections.remove(connection_id)?;
        info.phase = ConnectionPhase::Closed;
        tracing::debug!(connection_id = %connection_id, "Connection unregistered");
        Some(info)
    }

    pub async fn get(&self, connection_id: &ClientId) -> Option<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections.get(connection_id).map(|(info, _)| info.clone())
    }

    pub async fn is_joined(&self, connection_id: &ClientId) -> bool {
        self.get(connection_id)
            .await
            .is_some_and(|info| info.is_joined())
    }

    /// Bind an identity and enqueue the joiner's snapshot in one step, so no
    /// broadcast can land between the two.
    ///
    /// A repeated join re-binds the identity and queues a fresh snapshot.
    pub async fn join(
        &self,
        connection_id: &ClientId,
        client_id: ClientId,
        name: String,
        snapshot: ServerMessage,
    ) -> Result<(), ConnectionError> {
        let mut connections = self.connections.write().await;
        let (info, sender) = connections
            .get_mut(connection_id)
            .ok_or(ConnectionError::NotFound)?;

        info.client_id = Some(client_id);
        info.name = name;
        info.phase = ConnectionPhase::Joined;

        if let Err(e) = sender.try_send(snapshot) {
            connections.remove(connection_id);
            return Err(e.into());
        }
        Ok(())
    }

    /// Queue a message for one connection.
    pub async fn send_to(
        &self,
        connection_id: &ClientId,
        message: ServerMessage,
    ) -> Result<(), ConnectionError> {
        let mut connections = self.connections.write().await;
        let (_, sender) = connections
            .get(connection_id)
            .ok_or(ConnectionError::NotFound)?;

        if let Err(e) = sender.try_send(message) {
            connections.remove(connection_id);
            tracing::warn!(
                connection_id = %connection_id,
                error = %e,
                "Dropping connection that cannot take messages"
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// Queue a message for every joined connection, the sender included.
    ///
    /// A connection whose channel is full or closed is dropped from the
    /// registry; the others still get the message. Returns how many
    /// connections it was queued for.
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let mut connections = self.connections.write().await;
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, (info, sender)) in connections.iter() {
            if !info.is_joined() {
                continue;
            }
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %id,
                        message_type = message.type_name(),
                        error = %e,
                        "Failed to broadcast message"
                    );
                    dead.push(id.clone());
                }
            }
        }

        for id in dead {
            connections.remove(&id);
        }
        delivered
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn joined_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|(info, _)| info.is_joined())
            .count()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during connection operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection not found")]
    NotFound,
    #[error("Outbound channel full")]
    ChannelFull,
    #[error("Outbound channel closed")]
    ChannelClosed,
}

impl<T> From<TrySendError<T>> for ConnectionError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Self::ChannelFull,
            TrySendError::Closed(_) => Self::ChannelClosed,
        }
    }
}
