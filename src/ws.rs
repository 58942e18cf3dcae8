//! Streaming connections: registry, fan-out, wire events and the
//! per-connection session loops.

mod dispatch;
mod event;
mod registry;
mod session;

use std::sync::Arc;
use std::time::Duration;

pub use dispatch::Broadcaster;
pub use event::{ClientEvent, DecodeError, Envelope, ServerEvent};
pub use registry::{Connection, ConnectionId, Outbound, Registry};
pub use session::run_session;

use crate::db::ChatStore;

/// Per-connection limits and timers.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub queue_capacity: usize,
    /// Idle time on the outbound side before a ping is sent.
    pub ping_interval: Duration,
    /// Read deadline, refreshed by any inbound frame.
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub max_message_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_bytes: 512,
        }
    }
}

/// What a session needs from the rest of the process.
#[derive(Clone)]
pub struct Hub {
    pub broadcaster: Broadcaster,
    pub store: Arc<dyn ChatStore>,
    pub settings: SessionSettings,
}
