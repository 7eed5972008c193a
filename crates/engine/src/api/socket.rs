//! Per-connection socket handling and message dispatch.
//!
//! Each accepted socket gets a reader loop (this module) and a writer task
//! draining a bounded channel. Handlers never touch the socket directly; they
//! queue replies and broadcasts through the [`ConnectionManager`].

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use tabletop_domain::{
    AnyAsset, ClientId, MergeOutcome, SessionSnapshot, SessionState, TokenId, TokenRecord,
    PROTOCOL_VERSION,
};
use tabletop_shared::{
    decode_client_line, encode_line, encoded_len, ClientMessage, ProtocolError, ServerMessage,
    MAX_LINE_BYTES, SERVER_SENDER,
};

use crate::api::ConnectionManager;
use crate::app::App;
use crate::infrastructure::clock::unix_seconds;

/// Display name for clients that join without one
pub const DEFAULT_PLAYER_NAME: &str = "Player";

/// What the reader loop does after a message is handled.
#[derive(Debug, PartialEq)]
enum Outcome {
    Continue,
    Reply(ServerMessage),
    /// Flush this reply, then close the connection
    Close(ServerMessage),
}

/// Serve one client until it disconnects, fails, or `shutdown` fires.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Arc<App>,
    shutdown: CancellationToken,
) {
    let connection_id = ClientId::new();
    let (read_half, write_half) = stream.into_split();
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let mut sink = FramedWrite::new(write_half, LinesCodec::new());

    // Only the registry holds the sender, so unregistering closes the channel
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(app.channel_buffer);
    app.connections.register(connection_id.clone(), peer, tx).await;

    tracing::info!(connection_id = %connection_id, peer = %peer, "Connection established");

    let writer_done = CancellationToken::new();
    let send_task = tokio::spawn({
        let writer_done = writer_done.clone();
        let connection_id = connection_id.clone();
        async move {
            while let Some(msg) = rx.recv().await {
                let line = match encode_line(&msg) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(
                            connection_id = %connection_id,
                            error = %e,
                            "Failed to encode message"
                        );
                        continue;
                    }
                };
                if let Err(e) = sink.send(line).await {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Write failed");
                    break;
                }
            }
            // Flushes and shuts down the write half
            let _ = SinkExt::<String>::close(&mut sink).await;
            writer_done.cancel();
        }
    });

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = writer_done.cancelled() => break,
            next = lines.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::warn!(connection_id = %connection_id, "Line exceeds maximum length");
                let reply = ServerMessage::error(format!("Line too long (max {MAX_LINE_BYTES} bytes)"));
                let _ = app.connections.send_to(&connection_id, reply).await;
                break;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Read failed");
                break;
            }
            None => break,
        };

        if line.trim().is_empty() {
            continue;
        }

        let outcome = match decode_client_line(&line) {
            Ok(msg) => handle_message(msg, &app, &connection_id).await,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Rejected line");
                Outcome::Reply(ServerMessage::error(e.to_string()))
            }
        };

        match outcome {
            Outcome::Continue => {}
            Outcome::Reply(reply) => {
                if app.connections.send_to(&connection_id, reply).await.is_err() {
                    break;
                }
            }
            Outcome::Close(reply) => {
                let _ = app.connections.send_to(&connection_id, reply).await;
                break;
            }
        }
    }

    // Closing the channel lets the writer drain what is queued, then exit
    let info = app.connections.unregister(&connection_id).await;
    let _ = send_task.await;

    match info {
        Some(info) if !info.name.is_empty() => {
            tracing::info!(connection_id = %connection_id, name = %info.name, "Client left");
        }
        _ => tracing::info!(connection_id = %connection_id, "Connection terminated"),
    }
}

/// Dispatch a parsed client message to the appropriate handler.
async fn handle_message(msg: ClientMessage, app: &App, connection_id: &ClientId) -> Outcome {
    tracing::trace!(connection_id = %connection_id, message_type = msg.type_name(), "Handling message");

    match msg {
        ClientMessage::Join {
            client_id,
            name,
            protocol_version,
        } => handle_join(app, connection_id, client_id, name, protocol_version).await,

        ClientMessage::Ping => Outcome::Reply(ServerMessage::Pong {
            time: unix_seconds(app.clock.now()),
        }),

        ClientMessage::Unknown => Outcome::Reply(ServerMessage::error(
            ProtocolError::UnknownType("unknown".to_string()).to_string(),
        )),

        other => {
            if !app.connections.is_joined(connection_id).await {
                return Outcome::Reply(ServerMessage::error("Join required"));
            }
            match other {
                ClientMessage::TokenUpdate { token } => {
                    handle_token_update(app, connection_id, token).await
                }
                ClientMessage::Chat { from, message } => {
                    handle_chat(&app.connections, connection_id, from, message).await
                }
                ClientMessage::StateUpdate { state } => {
                    handle_state_update(app, connection_id, state).await
                }
                ClientMessage::Join { .. } | ClientMessage::Ping | ClientMessage::Unknown => {
                    Outcome::Continue
                }
            }
        }
    }
}

async fn handle_join(
    app: &App,
    connection_id: &ClientId,
    client_id: Option<String>,
    name: Option<String>,
    protocol_version: Option<i64>,
) -> Outcome {
    let client_version = protocol_version.unwrap_or(0);
    if client_version != i64::from(PROTOCOL_VERSION) {
        tracing::warn!(
            connection_id = %connection_id,
            client_version,
            server_version = PROTOCOL_VERSION,
            "Protocol mismatch"
        );
        return Outcome::Close(ServerMessage::error(format!(
            "Protocol mismatch (client {client_version}, server {PROTOCOL_VERSION})"
        )));
    }

    let client_id = client_id
        .and_then(|id| ClientId::parse(id).ok())
        .unwrap_or_else(|| connection_id.clone());
    let name = name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_string());

    // Snapshot and join notice go out under the session lock so no
    // token_update can be ordered between them
    let session = app.session.lock().await;
    let snapshot = ServerMessage::state(session.protocol_version(), session.snapshot());
    if let Err(e) = app
        .connections
        .join(connection_id, client_id.clone(), name.clone(), snapshot)
        .await
    {
        tracing::warn!(connection_id = %connection_id, error = %e, "Join failed");
        return Outcome::Continue;
    }
    app.connections
        .broadcast(ServerMessage::chat(SERVER_SENDER, format!("{name} joined.")))
        .await;
    drop(session);

    tracing::info!(
        connection_id = %connection_id,
        client_id = %client_id,
        name = %name,
        "Client joined"
    );
    Outcome::Continue
}

async fn handle_token_update(app: &App, connection_id: &ClientId, token: Value) -> Outcome {
    let Some(record) = TokenRecord::from_value(&token) else {
        return Outcome::Reply(ServerMessage::error("token_update missing token dict"));
    };
    if record.id().is_none() {
        return Outcome::Reply(ServerMessage::error("token_update missing token.id"));
    }

    let mut session = app.session.lock().await;
    let previous = record
        .id()
        .and_then(|raw| TokenId::parse(raw).ok())
        .and_then(|id| session.token(&id).cloned());
    match session.merge_token(&record, &AnyAsset) {
        Ok(outcome) => {
            if !snapshot_fits(app, &session) {
                match outcome {
                    MergeOutcome::Inserted(id) => {
                        session.remove_token(&id);
                    }
                    MergeOutcome::Updated(id) => {
                        if let (Some(slot), Some(previous)) = (session.token_mut(&id), previous) {
                            *slot = previous;
                        }
                    }
                }
                tracing::warn!(connection_id = %connection_id, "Token update refused, session too large");
                return Outcome::Reply(session_too_large(app));
            }
            tracing::debug!(
                connection_id = %connection_id,
                token_id = %outcome.token_id(),
                "Token merged"
            );
            // Relay what the client sent, unknown fields included
            app.connections
                .broadcast(ServerMessage::TokenUpdate { token })
                .await;
            Outcome::Continue
        }
        Err(e) => {
            tracing::debug!(connection_id = %connection_id, error = %e, "Token merge rejected");
            Outcome::Reply(ServerMessage::error(e.to_string()))
        }
    }
}

async fn handle_chat(
    connections: &ConnectionManager,
    connection_id: &ClientId,
    from: Option<String>,
    message: Option<String>,
) -> Outcome {
    let Some(message) = message else {
        tracing::debug!(connection_id = %connection_id, "Ignoring chat without a text message");
        return Outcome::Continue;
    };

    let from = match from.filter(|f| !f.is_empty()) {
        Some(from) => from,
        None => connections
            .get(connection_id)
            .await
            .map(|info| info.name)
            .unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_string()),
    };

    connections
        .broadcast(ServerMessage::chat(from, message))
        .await;
    Outcome::Continue
}

async fn handle_state_update(app: &App, connection_id: &ClientId, state: Value) -> Outcome {
    if !state.is_object() {
        return Outcome::Reply(ServerMessage::error("state_update missing 'state' dict"));
    }
    let snapshot: SessionSnapshot = match serde_json::from_value(state) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            return Outcome::Reply(ServerMessage::error(
                ProtocolError::InvalidPayload(e.to_string()).to_string(),
            ))
        }
    };

    let mut replacement = SessionState::new();
    for error in replacement.replace_all(snapshot, &AnyAsset) {
        tracing::debug!(connection_id = %connection_id, error = %error, "Skipped token record in state_update");
    }
    if !snapshot_fits(app, &replacement) {
        tracing::warn!(connection_id = %connection_id, "State update refused, session too large");
        return Outcome::Reply(session_too_large(app));
    }

    let mut session = app.session.lock().await;
    *session = replacement;
    let full = ServerMessage::state(session.protocol_version(), session.snapshot());
    app.connections.broadcast(full).await;

    tracing::info!(
        connection_id = %connection_id,
        tokens = session.token_count(),
        "Session replaced"
    );
    Outcome::Continue
}

/// Whether a full `state` of `session` stays within what clients accept.
fn snapshot_fits(app: &App, session: &SessionState) -> bool {
    let state = ServerMessage::state(session.protocol_version(), session.snapshot());
    encoded_len(&state).is_ok_and(|len| len <= app.max_state_bytes)
}

fn session_too_large(app: &App) -> ServerMessage {
    ServerMessage::error(format!(
        "Session too large (max {} bytes)",
        app.max_state_bytes
    ))
}
