//! Tabletop Player.
//!
//! The client half of the shared table: a line-protocol connection to the
//! engine, the local session with its rules engine, and campaign files on
//! disk. `main.rs` wires these into a console client.

pub mod application;
pub mod infrastructure;
pub mod runner;

pub use application::{LocalSession, SessionEvent};
pub use infrastructure::{GameClient, PlayerConfig};
