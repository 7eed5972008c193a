//! Server configuration

use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};

use tabletop_shared::MAX_SERVER_LINE_BYTES;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;
pub const DEFAULT_MAX_STATE_BYTES: usize = MAX_SERVER_LINE_BYTES;

/// Server configuration loaded from environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to listen on
    pub host: String,
    /// TCP port; 0 asks the OS for a free one
    pub port: u16,
    /// Outbound messages queued per connection before it counts as stalled
    pub channel_buffer: usize,
    /// Largest encoded `state` snapshot; updates that would exceed it are
    /// refused. Never above what clients accept.
    pub max_state_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
            max_state_bytes: DEFAULT_MAX_STATE_BYTES,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = lookup("TABLETOP_HOST")
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match lookup("TABLETOP_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("TABLETOP_PORT must be a port number, got {raw:?}"))?,
            None => DEFAULT_PORT,
        };

        let channel_buffer = match lookup("TABLETOP_CHANNEL_BUFFER") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| {
                    format!("TABLETOP_CHANNEL_BUFFER must be a positive integer, got {raw:?}")
                })?,
            None => DEFAULT_CHANNEL_BUFFER,
        };

        let max_state_bytes = match lookup("TABLETOP_MAX_STATE_BYTES") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| {
                    format!("TABLETOP_MAX_STATE_BYTES must be a positive integer, got {raw:?}")
                })?
                .min(MAX_SERVER_LINE_BYTES),
            None => DEFAULT_MAX_STATE_BYTES,
        };

        Ok(Self {
            host,
            port,
            channel_buffer,
            max_state_bytes,
        })
    }

    /// Loopback on an OS-assigned port.
    pub fn local_ephemeral() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Self::default()
        }
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
