use axum::{debug_handler, extract::{Path, State}, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    auth::CurrentUser,
    db::{ChatMessage, UserId},
    error::{ChatError, ChatResult},
    ws::ServerEvent,
    AppResult, AppState,
};

use super::{find_or_create_direct, member_room};

#[derive(Deserialize)]
pub(crate) struct SendMessageBody {
    content: String,
}

#[derive(Deserialize)]
pub(crate) struct DirectMessageBody {
    recipient_id: UserId,
    content: String,
}

/// Stamps, stores and fans out a message. The id is taken only after the
/// membership check so rejected sends never consume one. Sends are
/// serialized from id to broadcast, so messages are stored and delivered in
/// id order and a live event's id is a safe forward cursor.
pub(crate) async fn send_msg(
    state: &AppState,
    user_id: &str,
    room_id: &str,
    content: String,
) -> ChatResult<ChatMessage> {
    if content.trim().is_empty() {
        return Err(ChatError::InvalidRequest("content is required".to_owned()));
    }
    member_room(&*state.store, room_id, user_id).await?;

    let _append = state.append_lock.lock().await;
    let message = ChatMessage {
        id: state.ids.next(),
        room_id: room_id.to_owned(),
        user_id: user_id.to_owned(),
        content,
        sent_at: OffsetDateTime::now_utc(),
    };
    state.store.insert_message(&message).await?;

    let delivered = state
        .broadcaster
        .broadcast(room_id, &ServerEvent::NewMessage(message.clone()), None);
    debug!(room_id, message_id = %message.id, delivered, "message sent");

    Ok(message)
}

#[debug_handler]
pub(crate) async fn send_message(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<String>,
    Json(SendMessageBody { content }): Json<SendMessageBody>,
) -> AppResult<impl IntoResponse> {
    let message = send_msg(&state, &user_id, &room_id, content).await?;
    Ok(Json(json!({ "message": "Message sent", "room_id": room_id, "msg": message })))
}

#[debug_handler]
pub(crate) async fn send_direct_message(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(DirectMessageBody { recipient_id, content }): Json<DirectMessageBody>,
) -> AppResult<impl IntoResponse> {
    let room = find_or_create_direct(&*state.store, &user_id, &recipient_id).await?;
    let message = send_msg(&state, &user_id, &room.id, content).await?;
    Ok(Json(json!({ "message": "Direct message sent", "msg": message, "room": room })))
}
