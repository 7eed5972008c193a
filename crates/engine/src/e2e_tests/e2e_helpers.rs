//! Test server and raw line client for E2E tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use tabletop_shared::{decode_server_line, encode_line, ClientMessage, ServerMessage};

use crate::infrastructure::ports::MockClockPort;
use crate::{App, GameServer, ServerConfig};

/// Seconds since the epoch reported by the test clock
pub const FIXED_TIME: i64 = 1_700_000_000;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A server running in the background for the duration of one test.
pub struct TestServer {
    pub addr: SocketAddr,
    pub app: Arc<App>,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::local_ephemeral()).await
    }

    pub async fn start_with(config: ServerConfig) -> Self {
        let mut clock = MockClockPort::new();
        clock.expect_now().returning(|| {
            Utc.timestamp_opt(FIXED_TIME, 0)
                .single()
                .expect("valid timestamp")
        });

        let server = GameServer::bind(&config, Arc::new(clock))
            .await
            .expect("bind test server");
        let addr = server.local_addr().expect("local addr");
        let app = server.app();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));

        Self {
            addr,
            app,
            shutdown,
            handle,
        }
    }

    pub async fn client(&self) -> LineClient {
        LineClient::connect(self.addr).await
    }

    /// Connects and completes a version-1 join, consuming the snapshot and
    /// this client's own join notice.
    pub async fn joined_client(&self, name: &str) -> (LineClient, ServerMessage) {
        let mut client = self.client().await;
        client
            .send(&ClientMessage::join(name.to_lowercase(), name, 1))
            .await;
        let snapshot = client.recv().await;
        assert!(
            matches!(snapshot, ServerMessage::State { .. }),
            "expected state first, got {snapshot:?}"
        );
        let notice = client.recv().await;
        assert_eq!(notice, ServerMessage::chat("SERVER", format!("{name} joined.")));
        (client, snapshot)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let result = tokio::time::timeout(RECV_TIMEOUT, self.handle)
            .await
            .expect("server stops in time")
            .expect("server task");
        result.expect("server run");
    }
}

/// Minimal client speaking raw lines, so tests can also send garbage.
pub struct LineClient {
    framed: Framed<TcpStream, LinesCodec>,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self {
            framed: Framed::new(stream, LinesCodec::new()),
        }
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.framed.send(line).await.expect("send line");
    }

    pub async fn send(&mut self, msg: &ClientMessage) {
        let line = encode_line(msg).expect("encode");
        self.send_raw(&line).await;
    }

    /// Next line decoded as a server message.
    pub async fn recv(&mut self) -> ServerMessage {
        let line = self.recv_line().await.expect("connection open");
        decode_server_line(&line).expect("decodable server message")
    }

    /// Next raw line, or `None` once the server has closed the socket.
    pub async fn recv_line(&mut self) -> Option<String> {
        match tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(line))) => Some(line),
            Ok(Some(Err(e))) => panic!("read failed: {e}"),
            Ok(None) => None,
            Err(_) => panic!("timed out waiting for a line"),
        }
    }

    /// Asserts nothing arrives within a short window.
    pub async fn expect_silence(&mut self) {
        let quiet = tokio::time::timeout(Duration::from_millis(150), self.framed.next()).await;
        assert!(quiet.is_err(), "unexpected message: {quiet:?}");
    }
}
