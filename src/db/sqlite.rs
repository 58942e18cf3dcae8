use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::ids::MessageId;

use super::{ChatMessage, ChatStore, Direction, Room, UserId};

// Ids are stored hyphenated, so `id < ?` on TEXT matches creation order.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS room_members (
    room_id TEXT NOT NULL REFERENCES rooms(id),
    user_id TEXT NOT NULL,
    PRIMARY KEY (room_id, user_id)
);
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY NOT NULL,
    room_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    sent_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_room_id_id ON messages (room_id, id);
"#;

type MessageRow = (String, String, String, String, OffsetDateTime);
type RoomRow = (String, String, String, OffsetDateTime);

#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> ChatResult<Self> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await?;
        Self::from_pool(db_pool).await
    }

    /// Wraps an existing pool and creates any missing tables.
    pub async fn from_pool(db_pool: SqlitePool) -> ChatResult<Self> {
        sqlx::raw_sql(SCHEMA).execute(&db_pool).await?;
        info!("sqlite schema ready");
        Ok(Self { db_pool })
    }
}

fn parse_message((id, room_id, user_id, content, sent_at): MessageRow) -> ChatResult<ChatMessage> {
    let id = Uuid::parse_str(&id).map_err(|e| ChatError::Database(sqlx::Error::Decode(Box::new(e))))?;
    Ok(ChatMessage {
        id,
        room_id,
        user_id,
        content,
        sent_at,
    })
}

fn parse_room((id, name, kind, created_at): RoomRow) -> ChatResult<Room> {
    Ok(Room {
        id,
        name,
        kind: kind.parse()?,
        created_at,
    })
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn insert_message(&self, message: &ChatMessage) -> ChatResult<()> {
        sqlx::query("INSERT INTO messages (id,room_id,user_id,content,sent_at) VALUES (?,?,?,?,?)")
            .bind(message.id.to_string())
            .bind(&message.room_id)
            .bind(&message.user_id)
            .bind(&message.content)
            .bind(message.sent_at)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn query_messages(
        &self,
        room_id: &str,
        boundary: Option<MessageId>,
        direction: Direction,
        limit: usize,
    ) -> ChatResult<Vec<ChatMessage>> {
        let sql = match (direction, boundary.is_some()) {
            (Direction::Older, true) => {
                "SELECT id,room_id,user_id,content,sent_at FROM messages WHERE room_id=? AND id<? ORDER BY id DESC LIMIT ?"
            }
            (Direction::Older, false) => {
                "SELECT id,room_id,user_id,content,sent_at FROM messages WHERE room_id=? ORDER BY id DESC LIMIT ?"
            }
            (Direction::Newer, true) => {
                "SELECT id,room_id,user_id,content,sent_at FROM messages WHERE room_id=? AND id>? ORDER BY id ASC LIMIT ?"
            }
            (Direction::Newer, false) => {
                "SELECT id,room_id,user_id,content,sent_at FROM messages WHERE room_id=? ORDER BY id ASC LIMIT ?"
            }
        };

        let mut query = sqlx::query_as::<_, MessageRow>(sql).bind(room_id);
        if let Some(boundary) = boundary {
            query = query.bind(boundary.to_string());
        }
        let rows = query.bind(limit as i64).fetch_all(&self.db_pool).await?;

        rows.into_iter().map(parse_message).collect()
    }

    async fn room_members(&self, room_id: &str) -> ChatResult<BTreeSet<UserId>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT user_id FROM room_members WHERE room_id=?")
            .bind(room_id)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
    }

    async fn create_room(&self, room: &Room, members: &BTreeSet<UserId>) -> ChatResult<()> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query("INSERT INTO rooms (id,name,kind,created_at) VALUES (?,?,?,?)")
            .bind(&room.id)
            .bind(&room.name)
            .bind(room.kind.as_str())
            .bind(room.created_at)
            .execute(&mut *tx)
            .await?;
        for user_id in members {
            sqlx::query("INSERT INTO room_members (room_id,user_id) VALUES (?,?)")
                .bind(&room.id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn room(&self, room_id: &str) -> ChatResult<Option<Room>> {
        let row: Option<RoomRow> = sqlx::query_as("SELECT id,name,kind,created_at FROM rooms WHERE id=?")
            .bind(room_id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(parse_room).transpose()
    }

    async fn rooms_for_user(&self, user_id: &str) -> ChatResult<Vec<Room>> {
        let rows: Vec<RoomRow> = sqlx::query_as(
            "SELECT r.id,r.name,r.kind,r.created_at FROM rooms r \
             JOIN room_members rm ON r.id=rm.room_id \
             WHERE rm.user_id=? ORDER BY r.created_at DESC, r.id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await?;
        rows.into_iter().map(parse_room).collect()
    }

    async fn find_direct_room(&self, a: &str, b: &str) -> ChatResult<Option<Room>> {
        let row: Option<RoomRow> = sqlx::query_as(
            "SELECT r.id,r.name,r.kind,r.created_at FROM rooms r \
             JOIN room_members rm1 ON r.id=rm1.room_id \
             JOIN room_members rm2 ON r.id=rm2.room_id \
             WHERE r.kind='direct' AND rm1.user_id=? AND rm2.user_id=? LIMIT 1",
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.db_pool)
        .await?;
        row.map(parse_room).transpose()
    }

    async fn add_member(&self, room_id: &str, user_id: &str) -> ChatResult<()> {
        if self.room(room_id).await?.is_none() {
            return Err(ChatError::NotFound(format!("room {room_id}")));
        }
        sqlx::query("INSERT OR IGNORE INTO room_members (room_id,user_id) VALUES (?,?)")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn remove_member(&self, room_id: &str, user_id: &str) -> ChatResult<()> {
        if self.room(room_id).await?.is_none() {
            return Err(ChatError::NotFound(format!("room {room_id}")));
        }
        sqlx::query("DELETE FROM room_members WHERE room_id=? AND user_id=?")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RoomKind;
    use crate::ids::IdGenerator;

    async fn store() -> SqliteStore {
        // one connection, otherwise every pooled connection opens its own empty memory db
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::from_pool(db_pool).await.unwrap()
    }

    fn room(id: &str, kind: RoomKind) -> Room {
        Room {
            id: id.to_owned(),
            name: format!("room {id}"),
            kind,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn members(ids: &[&str]) -> BTreeSet<UserId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn pages_by_id_in_both_directions() {
        let store = store().await;
        let ids = IdGenerator::new();
        let mut sent = Vec::new();
        for n in 0..5 {
            let message = ChatMessage {
                id: ids.next(),
                room_id: "r1".to_owned(),
                user_id: "alice".to_owned(),
                content: format!("hello {n}"),
                sent_at: OffsetDateTime::now_utc(),
            };
            store.insert_message(&message).await.unwrap();
            sent.push(message.id);
        }

        let newest: Vec<_> = store
            .query_messages("r1", None, Direction::Older, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(newest, vec![sent[4], sent[3]]);

        let older: Vec<_> = store
            .query_messages("r1", Some(sent[3]), Direction::Older, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(older, vec![sent[2], sent[1], sent[0]]);

        let newer: Vec<_> = store
            .query_messages("r1", Some(sent[1]), Direction::Newer, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(newer, vec![sent[2], sent[3]]);

        assert!(store
            .query_messages("other", None, Direction::Older, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn rooms_and_memberships_round_trip() {
        let store = store().await;
        store
            .create_room(&room("dm", RoomKind::Direct), &members(&["alice", "bob"]))
            .await
            .unwrap();
        store
            .create_room(&room("team", RoomKind::Group), &members(&["alice"]))
            .await
            .unwrap();

        assert_eq!(store.room("dm").await.unwrap().unwrap().kind, RoomKind::Direct);
        assert!(store.room("missing").await.unwrap().is_none());
        assert_eq!(store.rooms_for_user("alice").await.unwrap().len(), 2);
        assert_eq!(store.rooms_for_user("bob").await.unwrap().len(), 1);

        let dm = store.find_direct_room("bob", "alice").await.unwrap().unwrap();
        assert_eq!(dm.id, "dm");
        assert!(store.find_direct_room("alice", "carol").await.unwrap().is_none());

        store.add_member("team", "carol").await.unwrap();
        assert_eq!(store.room_members("team").await.unwrap(), members(&["alice", "carol"]));
        store.remove_member("team", "alice").await.unwrap();
        assert_eq!(store.room_members("team").await.unwrap(), members(&["carol"]));

        assert!(matches!(
            store.add_member("missing", "carol").await,
            Err(ChatError::NotFound(_))
        ));
    }
}
