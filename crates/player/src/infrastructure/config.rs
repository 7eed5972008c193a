//! Player configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;

pub const DEFAULT_SERVER: &str = "127.0.0.1:8765";
pub const DEFAULT_PLAYER_NAME: &str = "Player";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Player configuration loaded from environment
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// `host:port` of the game server
    pub server: String,
    /// Display name sent in `join`
    pub player_name: String,
    pub connect_timeout: Duration,
    /// Root for the asset registry and saved campaigns
    pub data_dir: PathBuf,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            player_name: DEFAULT_PLAYER_NAME.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            data_dir: default_data_dir(),
        }
    }
}

impl PlayerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let connect_timeout = match non_empty("TABLETOP_CONNECT_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs_f64(
                raw.parse::<f64>()
                    .ok()
                    .filter(|secs| secs.is_finite() && *secs > 0.0)
                    .with_context(|| {
                        format!("TABLETOP_CONNECT_TIMEOUT_SECS must be a positive number, got {raw:?}")
                    })?,
            ),
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        Ok(Self {
            server: non_empty("TABLETOP_SERVER").unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            player_name: non_empty("TABLETOP_PLAYER_NAME")
                .unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_string()),
            connect_timeout,
            data_dir: non_empty("TABLETOP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
        })
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join("assets")
    }

    pub fn campaigns_dir(&self) -> PathBuf {
        self.data_dir.join("campaigns")
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("io", "tabletop", "player") {
        dirs.data_dir().to_path_buf()
    } else {
        // Fallback to current directory if project dirs unavailable
        PathBuf::from("tabletop_data")
    }
}
