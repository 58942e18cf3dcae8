//! Room fan-out with eviction of consumers that cannot keep up.

use std::sync::Arc;

use tracing::{debug, warn};

use super::event::ServerEvent;
use super::registry::{Connection, Outbound, Registry};

/// Publishes events to room subscribers. Cheap to clone.
#[derive(Clone, Default)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Enqueues `event` on every subscriber of `room_id` except those owned
    /// by `exclude_user`. Never waits on a consumer: a connection whose queue
    /// is full or closed is unregistered instead. Returns how many queues
    /// accepted the event.
    pub fn broadcast(&self, room_id: &str, event: &ServerEvent, exclude_user: Option<&str>) -> usize {
        let Some(payload) = encode(event) else {
            return 0;
        };

        let subscribers = self.registry.subscribers_of(room_id);
        let mut delivered = 0;
        for connection in &subscribers {
            if exclude_user.is_some_and(|user| user == connection.user_id()) {
                continue;
            }
            if self.deliver(connection, Arc::clone(&payload)) {
                delivered += 1;
            }
        }
        debug!(
            room_id,
            event_type = event.kind(),
            subscribers = subscribers.len(),
            delivered,
            "broadcast"
        );
        delivered
    }

    /// Direct reply to one connection under the same overload policy.
    pub fn send_to(&self, connection: &Connection, event: &ServerEvent) -> bool {
        match encode(event) {
            Some(payload) => self.deliver(connection, payload),
            None => false,
        }
    }

    fn deliver(&self, connection: &Connection, payload: Outbound) -> bool {
        match connection.enqueue(payload) {
            Ok(()) => true,
            Err(error) if error.is_fatal_to_connection() => {
                warn!(conn_id = %connection.id(), user_id = connection.user_id(), %error, "evicting connection");
                self.registry.unregister(connection.id());
                false
            }
            Err(error) => {
                debug!(conn_id = %connection.id(), %error, "event not delivered");
                false
            }
        }
    }
}

fn encode(event: &ServerEvent) -> Option<Outbound> {
    match event.encode() {
        Ok(json) => Some(Arc::from(json)),
        Err(error) => {
            warn!(event_type = event.kind(), %error, "failed to serialize event");
            None
        }
    }
}
