//! Live connections and the room subscription index.
//!
//! Lock order is registry first, then a connection's room set. Nothing takes
//! the registry lock while holding a connection lock.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::{RoomId, UserId};
use crate::error::{ChatError, ChatResult};

/// Serialized event, shared between every queue it is fanned out to.
pub type Outbound = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One authenticated streaming connection.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    /// `None` once the queue has been closed by teardown.
    queue: Mutex<Option<mpsc::Sender<Outbound>>>,
    /// Only mutated while the registry write lock is held.
    rooms: Mutex<HashSet<RoomId>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Connection {
    /// Creates the connection together with the receiving end of its
    /// outbound queue, which belongs to the writer loop.
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let connection = Self {
            id,
            user_id,
            queue: Mutex::new(Some(tx)),
            rooms: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        };
        (Arc::new(connection), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Non-blocking enqueue. A full queue is `Overloaded`, a closed one is a
    /// `Transport` failure.
    pub fn enqueue(&self, item: Outbound) -> ChatResult<()> {
        let queue = self.queue.lock();
        let Some(tx) = queue.as_ref() else {
            return Err(ChatError::Transport("outbound queue closed".to_owned()));
        };
        tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChatError::Overloaded,
            mpsc::error::TrySendError::Closed(_) => {
                ChatError::Transport("outbound queue closed".to_owned())
            }
        })
    }

    pub fn subscribed_rooms(&self) -> HashSet<RoomId> {
        self.rooms.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection has been torn down.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Closes the outbound queue and signals the transport loops. Returns
    /// true only for the call that actually performed the close.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        drop(self.queue.lock().take());
        self.shutdown.cancel();
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Default)]
struct Index {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    rooms: HashMap<RoomId, HashMap<ConnectionId, Arc<Connection>>>,
}

/// Owns every live connection and which rooms each one listens to.
#[derive(Default)]
pub struct Registry {
    index: RwLock<Index>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn register(&self, connection: Arc<Connection>) -> ChatResult<()> {
        let mut index = self.index.write();
        if index.connections.contains_key(&connection.id) {
            return Err(ChatError::DuplicateConnection(connection.id));
        }
        info!(conn_id = %connection.id, user_id = %connection.user_id, "connection registered");
        index.connections.insert(connection.id, connection);
        Ok(())
    }

    /// Removes the connection from every room and closes it. Unknown or
    /// already removed ids are a no-op.
    pub fn unregister(&self, id: ConnectionId) {
        let connection = {
            let mut index = self.index.write();
            let Some(connection) = index.connections.remove(&id) else {
                return;
            };
            let rooms: Vec<RoomId> = connection.rooms.lock().drain().collect();
            for room_id in rooms {
                leave_room(&mut index, &room_id, id);
            }
            connection
        };

        if connection.close() {
            info!(conn_id = %id, user_id = %connection.user_id, "connection unregistered");
        }
    }

    /// Idempotent.
    pub fn subscribe(&self, id: ConnectionId, room_id: &str) -> ChatResult<()> {
        let mut index = self.index.write();
        let connection = index
            .connections
            .get(&id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("connection {id}")))?;
        connection.rooms.lock().insert(room_id.to_owned());
        index
            .rooms
            .entry(room_id.to_owned())
            .or_default()
            .insert(id, connection);
        debug!(conn_id = %id, room_id, "subscribed");
        Ok(())
    }

    pub fn unsubscribe(&self, id: ConnectionId, room_id: &str) -> ChatResult<()> {
        let mut index = self.index.write();
        let connection = index
            .connections
            .get(&id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("connection {id}")))?;
        connection.rooms.lock().remove(room_id);
        leave_room(&mut index, room_id, id);
        debug!(conn_id = %id, room_id, "unsubscribed");
        Ok(())
    }

    /// Snapshot of the room's subscribers. The lock is released before return.
    pub fn subscribers_of(&self, room_id: &str) -> Vec<Arc<Connection>> {
        self.index
            .read()
            .rooms
            .get(room_id)
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.index.read().connections.get(&id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.index.read().connections.len()
    }

    pub fn room_subscriber_count(&self, room_id: &str) -> usize {
        self.index
            .read()
            .rooms
            .get(room_id)
            .map_or(0, HashMap::len)
    }

    pub fn room_count(&self) -> usize {
        self.index.read().rooms.len()
    }
}

/// Drops `id` from the room's subscriber set, and the set itself once empty.
fn leave_room(index: &mut Index, room_id: &str, id: ConnectionId) {
    if let Some(subscribers) = index.rooms.get_mut(room_id) {
        subscribers.remove(&id);
        if subscribers.is_empty() {
            index.rooms.remove(room_id);
        }
    }
}
