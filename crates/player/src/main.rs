//! Tabletop Player - console client entry point.

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tabletop_player::runner::Console;
use tabletop_player::PlayerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the binary may be started from `crates/player`).
    load_dotenv_from_repo_root();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabletop_player=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Tabletop Player");

    let config = PlayerConfig::from_env()?;
    tracing::info!(
        server = %config.server,
        player_name = %config.player_name,
        data_dir = %config.data_dir.display(),
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, leaving the table"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                return;
            }
        }
        signal.cancel();
    });

    Console::new(config).run(shutdown).await
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
