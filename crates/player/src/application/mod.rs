//! Application layer - the local session and what flows through it.

pub mod session;

pub use session::{ChatLine, LocalSession, SessionEvent};
