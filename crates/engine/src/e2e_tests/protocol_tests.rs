//! Protocol error handling over a live socket.

use tabletop_shared::{ClientMessage, ServerMessage};

use super::*;

#[tokio::test]
async fn test_version_mismatch_replies_then_closes() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client
        .send_raw(r#"{"type":"join","client_id":"x","name":"Old","protocol_version":2}"#)
        .await;

    assert_eq!(
        client.recv().await,
        ServerMessage::error("Protocol mismatch (client 2, server 1)")
    );
    assert_eq!(client.recv_line().await, None);
    assert_eq!(server.app.connections.connection_count().await, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_json_keeps_stream_open() {
    let server = TestServer::start().await;
    let (mut client, _) = server.joined_client("Alice").await;

    client.send_raw("{this is not json").await;
    assert_eq!(client.recv().await, ServerMessage::error("Invalid JSON"));

    client.send(&ClientMessage::Ping).await;
    assert_eq!(
        client.recv().await,
        ServerMessage::Pong {
            time: FIXED_TIME as f64
        }
    );

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_type_is_named_in_error() {
    let server = TestServer::start().await;
    let (mut client, _) = server.joined_client("Alice").await;

    client.send_raw(r#"{"type":"teleport","to":"moon"}"#).await;
    assert_eq!(
        client.recv().await,
        ServerMessage::error("Unknown message type: teleport")
    );

    server.stop().await;
}

#[tokio::test]
async fn test_join_required_but_ping_allowed() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.send(&ClientMessage::chat("anyone?")).await;
    assert_eq!(client.recv().await, ServerMessage::error("Join required"));

    client.send(&ClientMessage::Ping).await;
    assert!(matches!(client.recv().await, ServerMessage::Pong { .. }));

    server.stop().await;
}

#[tokio::test]
async fn test_errors_go_to_sender_only() {
    let server = TestServer::start().await;
    let (mut alice, _) = server.joined_client("Alice").await;
    let (mut bob, _) = server.joined_client("Bob").await;
    let _ = alice.recv().await;

    bob.send_raw(r#"{"type":"token_update","token":{"x":1}}"#)
        .await;
    assert_eq!(
        bob.recv().await,
        ServerMessage::error("token_update missing token.id")
    );
    alice.expect_silence().await;

    server.stop().await;
}

#[tokio::test]
async fn test_blank_lines_are_ignored() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client.send_raw("").await;
    client.send_raw("   ").await;
    client.send(&ClientMessage::Ping).await;
    assert!(matches!(client.recv().await, ServerMessage::Pong { .. }));

    server.stop().await;
}
