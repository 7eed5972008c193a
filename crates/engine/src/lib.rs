//! Tabletop Engine library.
//!
//! The authoritative server: one shared session, many TCP clients speaking
//! line-delimited JSON.
//!
//! ## Structure
//!
//! - `infrastructure/` - configuration and the clock port
//! - `api/` - connection registry, socket reader/writer, message handlers
//! - `app` - shared state
//! - `server` - listener and accept loop

pub mod api;
pub mod app;
pub mod infrastructure;
pub mod server;

/// End-to-end tests against a server bound on loopback.
#[cfg(test)]
mod e2e_tests;

pub use app::App;
pub use infrastructure::config::ServerConfig;
pub use server::GameServer;
