//! Engine E2E tests.
//!
//! Each test binds a real [`GameServer`](crate::GameServer) on
//! `127.0.0.1:0` and talks to it over TCP with newline-delimited JSON,
//! exactly as a player would.
//!
//! ```bash
//! cargo test -p tabletop-engine --lib e2e_tests
//! ```

mod e2e_helpers;
mod protocol_tests;

pub use e2e_helpers::*;
