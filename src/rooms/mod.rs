mod messages;
mod msg;
mod new;
mod room;
mod ws;

use std::collections::BTreeSet;

use axum::{routing::{get, post}, Router};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::{
    db::{ChatStore, Room, RoomKind},
    error::{ChatError, ChatResult},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(room::list_rooms).post(new::new_room))
        .route("/rooms/{room_id}", get(room::room_info))
        .route("/rooms/{room_id}/members", post(room::add_member).delete(room::remove_member))
        .route("/rooms/{room_id}/messages", get(messages::room_messages).post(msg::send_message))
        .route("/rooms/{room_id}/messages/new", get(messages::new_room_messages))
        .route("/direct/message", post(msg::send_direct_message))
        .route("/direct/room/{recipient_id}", get(room::direct_room))
        .route("/direct/messages/{recipient_id}", get(messages::direct_messages))
        .route("/ws", get(ws::connect))
        .route("/ws/stats", get(ws::stats))
}

/// The room, provided `user_id` belongs to it.
pub(crate) async fn member_room(store: &dyn ChatStore, room_id: &str, user_id: &str) -> ChatResult<Room> {
    let room = store
        .room(room_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("room {room_id}")))?;
    if !store.room_members(room_id).await?.contains(user_id) {
        return Err(ChatError::Forbidden("user is not a member of this room".to_owned()));
    }
    Ok(room)
}

/// The direct room between two users, created on first contact.
pub(crate) async fn find_or_create_direct(store: &dyn ChatStore, user_id: &str, recipient_id: &str) -> ChatResult<Room> {
    if recipient_id.is_empty() || recipient_id == user_id {
        return Err(ChatError::InvalidRequest("recipient must be another user".to_owned()));
    }
    if let Some(room) = store.find_direct_room(user_id, recipient_id).await? {
        return Ok(room);
    }

    let room = Room {
        id: Uuid::now_v7().to_string(),
        name: "Direct Message".to_owned(),
        kind: RoomKind::Direct,
        created_at: OffsetDateTime::now_utc(),
    };
    let members = BTreeSet::from([user_id.to_owned(), recipient_id.to_owned()]);
    store.create_room(&room, &members).await?;
    info!(room_id = %room.id, user_id, recipient_id, "direct room created");
    Ok(room)
}
