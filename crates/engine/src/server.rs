//! TCP listener and accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::api::handle_connection;
use crate::app::App;
use crate::infrastructure::config::ServerConfig;
use crate::infrastructure::ports::ClockPort;

/// A bound, not yet running, game server.
pub struct GameServer {
    listener: TcpListener,
    app: Arc<App>,
}

impl GameServer {
    /// Binds the listening socket. This is the only fatal failure point.
    pub async fn bind(config: &ServerConfig, clock: Arc<dyn ClockPort>) -> Result<Self> {
        let addr = config.bind_address()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self {
            listener,
            app: Arc::new(
                App::new(clock, config.channel_buffer).with_max_state_bytes(config.max_state_bytes),
            ),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn app(&self) -> Arc<App> {
        Arc::clone(&self.app)
    }

    /// Accepts clients until `shutdown` is cancelled, then waits for every
    /// connection task to wind down.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let tracker = TaskTracker::new();
        tracing::info!(addr = %self.local_addr()?, "Game server listening");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "Could not disable Nagle");
                    }
                    tracker.spawn(handle_connection(
                        stream,
                        peer,
                        Arc::clone(&self.app),
                        shutdown.child_token(),
                    ));
                }
                // Per-connection accept errors (e.g. the peer reset early) are not fatal
                Err(e) => tracing::warn!(error = %e, "Accept failed"),
            }
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!("Game server stopped");
        Ok(())
    }
}
