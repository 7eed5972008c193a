//! API layer - the line-delimited JSON socket protocol.

pub mod connections;
pub mod socket;

pub use connections::{ConnectionError, ConnectionInfo, ConnectionManager, ConnectionPhase};
pub use socket::handle_connection;
