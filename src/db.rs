mod memory;
mod sqlite;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ChatError, ChatResult};
use crate::ids::MessageId;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

pub type RoomId = String;
pub type UserId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Direct,
    Group,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        use RoomKind::*;
        match self {
            Direct => "direct",
            Group => "group",
        }
    }

    /// Checks a prospective member list against the kind's size rule.
    pub fn validate_members(&self, members: &BTreeSet<UserId>) -> ChatResult<()> {
        match self {
            RoomKind::Direct if members.len() != 2 => Err(ChatError::InvalidRequest(
                "direct rooms must have exactly 2 members".to_owned(),
            )),
            RoomKind::Group if members.is_empty() => Err(ChatError::InvalidRequest(
                "group rooms need at least one member".to_owned(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(RoomKind::Direct),
            "group" => Ok(RoomKind::Group),
            other => Err(ChatError::InvalidRequest(format!("unknown room type {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
}

/// Which side of the boundary id a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ids below the boundary, newest first.
    Older,
    /// Ids above the boundary, oldest first.
    Newer,
}

/// Durable rooms, memberships and messages.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn insert_message(&self, message: &ChatMessage) -> ChatResult<()>;

    /// Up to `limit` messages of `room_id` strictly beyond `boundary` in
    /// `direction`, ordered by id (descending for `Older`, ascending for
    /// `Newer`). A missing boundary reads from the matching end of the room.
    async fn query_messages(
        &self,
        room_id: &str,
        boundary: Option<MessageId>,
        direction: Direction,
        limit: usize,
    ) -> ChatResult<Vec<ChatMessage>>;

    async fn room_members(&self, room_id: &str) -> ChatResult<BTreeSet<UserId>>;

    async fn create_room(&self, room: &Room, members: &BTreeSet<UserId>) -> ChatResult<()>;

    async fn room(&self, room_id: &str) -> ChatResult<Option<Room>>;

    /// Rooms `user_id` belongs to, most recently created first.
    async fn rooms_for_user(&self, user_id: &str) -> ChatResult<Vec<Room>>;

    async fn find_direct_room(&self, a: &str, b: &str) -> ChatResult<Option<Room>>;

    async fn add_member(&self, room_id: &str, user_id: &str) -> ChatResult<()>;

    async fn remove_member(&self, room_id: &str, user_id: &str) -> ChatResult<()>;
}
