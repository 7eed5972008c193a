//! Application state shared by every connection task.

use std::sync::Arc;

use tokio::sync::Mutex;

use tabletop_domain::SessionState;
use tabletop_shared::MAX_SERVER_LINE_BYTES;

use crate::api::ConnectionManager;
use crate::infrastructure::ports::ClockPort;

/// Main application state.
///
/// Lock order: `session` may be held while `connections` is taken, never the
/// other way round. Neither lock is held across socket I/O.
pub struct App {
    /// The one authoritative session
    pub session: Mutex<SessionState>,
    pub connections: ConnectionManager,
    pub clock: Arc<dyn ClockPort>,
    /// Capacity of each connection's outbound channel
    pub channel_buffer: usize,
    /// Largest encoded `state` snapshot the session may grow to
    pub max_state_bytes: usize,
}

impl App {
    pub fn new(clock: Arc<dyn ClockPort>, channel_buffer: usize) -> Self {
        Self {
            session: Mutex::new(SessionState::new()),
            connections: ConnectionManager::new(),
            clock,
            channel_buffer: channel_buffer.max(1),
            max_state_bytes: MAX_SERVER_LINE_BYTES,
        }
    }

    pub fn with_max_state_bytes(mut self, max_state_bytes: usize) -> Self {
        self.max_state_bytes = max_state_bytes.min(MAX_SERVER_LINE_BYTES);
        self
    }
}
