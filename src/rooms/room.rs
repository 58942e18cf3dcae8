use axum::{debug_handler, extract::{Path, State}, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    auth::CurrentUser,
    db::{RoomKind, UserId},
    error::ChatError,
    AppResult, AppState,
};

use super::{find_or_create_direct, member_room};

#[derive(Debug, Deserialize)]
pub(crate) struct MemberBody {
    member_id: UserId,
}

#[debug_handler]
pub(crate) async fn list_rooms(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<impl IntoResponse> {
    let rooms = state.store.rooms_for_user(&user_id).await?;
    Ok(Json(json!({ "message": "Chat rooms retrieved", "rooms": rooms })))
}

#[debug_handler]
pub(crate) async fn room_info(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let room = member_room(&*state.store, &room_id, &user_id).await?;
    let member_count = state.store.room_members(&room_id).await?.len();
    Ok(Json(json!({
        "message": "Room information retrieved",
        "room": room,
        "member_count": member_count,
    })))
}

#[debug_handler]
pub(crate) async fn add_member(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<String>,
    Json(MemberBody { member_id }): Json<MemberBody>,
) -> AppResult<impl IntoResponse> {
    let room = member_room(&*state.store, &room_id, &user_id).await?;
    if room.kind != RoomKind::Group {
        return Err(ChatError::InvalidRequest("can only add members to group rooms".to_owned()).into());
    }
    if member_id.is_empty() {
        return Err(ChatError::InvalidRequest("member_id is required".to_owned()).into());
    }
    if state.store.room_members(&room_id).await?.contains(&member_id) {
        return Err(ChatError::Conflict("user is already a member of this room".to_owned()).into());
    }

    state.store.add_member(&room_id, &member_id).await?;
    info!(room_id = %room_id, member_id = %member_id, added_by = %user_id, "member added");

    Ok(Json(json!({
        "message": "Member added to room",
        "room_id": room_id,
        "member_id": member_id,
    })))
}

#[debug_handler]
pub(crate) async fn remove_member(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<String>,
    Json(MemberBody { member_id }): Json<MemberBody>,
) -> AppResult<impl IntoResponse> {
    let room = member_room(&*state.store, &room_id, &user_id).await?;
    if room.kind != RoomKind::Group {
        return Err(ChatError::InvalidRequest("can only remove members from group rooms".to_owned()).into());
    }
    let members = state.store.room_members(&room_id).await?;
    if !members.contains(&member_id) {
        return Err(ChatError::NotFound(format!("member {member_id}")).into());
    }
    if members.len() == 1 {
        return Err(ChatError::InvalidRequest("cannot remove the last member of a room".to_owned()).into());
    }

    state.store.remove_member(&room_id, &member_id).await?;
    info!(room_id = %room_id, member_id = %member_id, removed_by = %user_id, "member removed");

    Ok(Json(json!({
        "message": "Member removed from room",
        "room_id": room_id,
        "member_id": member_id,
    })))
}

#[debug_handler]
pub(crate) async fn direct_room(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(recipient_id): Path<UserId>,
) -> AppResult<impl IntoResponse> {
    let room = find_or_create_direct(&*state.store, &user_id, &recipient_id).await?;
    Ok(Json(json!({ "message": "Direct message room retrieved", "room": room })))
}
