use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{ChatError, ChatResult};
use crate::ids::MessageId;

use super::{ChatMessage, ChatStore, Direction, Room, RoomKind, UserId};

#[derive(Default)]
struct Tables {
    rooms: HashMap<String, Room>,
    members: HashMap<String, BTreeSet<UserId>>,
    messages: HashMap<String, BTreeMap<MessageId, ChatMessage>>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn insert_message(&self, message: &ChatMessage) -> ChatResult<()> {
        let mut tables = self.tables.write();
        let room = tables.messages.entry(message.room_id.clone()).or_default();
        if room.contains_key(&message.id) {
            return Err(ChatError::Conflict(format!("message {} exists", message.id)));
        }
        room.insert(message.id, message.clone());
        Ok(())
    }

    async fn query_messages(
        &self,
        room_id: &str,
        boundary: Option<MessageId>,
        direction: Direction,
        limit: usize,
    ) -> ChatResult<Vec<ChatMessage>> {
        let tables = self.tables.read();
        let Some(room) = tables.messages.get(room_id) else {
            return Ok(Vec::new());
        };

        let rows = match (direction, boundary) {
            (Direction::Older, Some(b)) => room
                .range(..b)
                .rev()
                .take(limit)
                .map(|(_, m)| m.clone())
                .collect(),
            (Direction::Older, None) => room.values().rev().take(limit).cloned().collect(),
            (Direction::Newer, Some(b)) => room
                .range((Bound::Excluded(b), Bound::Unbounded))
                .take(limit)
                .map(|(_, m)| m.clone())
                .collect(),
            (Direction::Newer, None) => room.values().take(limit).cloned().collect(),
        };
        Ok(rows)
    }

    async fn room_members(&self, room_id: &str) -> ChatResult<BTreeSet<UserId>> {
        Ok(self
            .tables
            .read()
            .members
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_room(&self, room: &Room, members: &BTreeSet<UserId>) -> ChatResult<()> {
        let mut tables = self.tables.write();
        if tables.rooms.contains_key(&room.id) {
            return Err(ChatError::Conflict(format!("room {} exists", room.id)));
        }
        tables.rooms.insert(room.id.clone(), room.clone());
        tables.members.insert(room.id.clone(), members.clone());
        Ok(())
    }

    async fn room(&self, room_id: &str) -> ChatResult<Option<Room>> {
        Ok(self.tables.read().rooms.get(room_id).cloned())
    }

    async fn rooms_for_user(&self, user_id: &str) -> ChatResult<Vec<Room>> {
        let tables = self.tables.read();
        let mut rooms: Vec<Room> = tables
            .members
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .filter_map(|(room_id, _)| tables.rooms.get(room_id).cloned())
            .collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rooms)
    }

    async fn find_direct_room(&self, a: &str, b: &str) -> ChatResult<Option<Room>> {
        let tables = self.tables.read();
        Ok(tables
            .rooms
            .values()
            .filter(|room| room.kind == RoomKind::Direct)
            .find(|room| {
                tables
                    .members
                    .get(&room.id)
                    .is_some_and(|m| m.contains(a) && m.contains(b))
            })
            .cloned())
    }

    async fn add_member(&self, room_id: &str, user_id: &str) -> ChatResult<()> {
        let mut tables = self.tables.write();
        let members = tables
            .members
            .get_mut(room_id)
            .ok_or_else(|| ChatError::NotFound(format!("room {room_id}")))?;
        members.insert(user_id.to_owned());
        Ok(())
    }

    async fn remove_member(&self, room_id: &str, user_id: &str) -> ChatResult<()> {
        let mut tables = self.tables.write();
        let members = tables
            .members
            .get_mut(room_id)
            .ok_or_else(|| ChatError::NotFound(format!("room {room_id}")))?;
        members.remove(user_id);
        Ok(())
    }
}
