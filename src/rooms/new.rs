use std::collections::BTreeSet;

use axum::{debug_handler, extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    db::{Room, RoomKind, UserId},
    error::ChatError,
    AppResult, AppState,
};

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomBody {
    name: String,
    #[serde(rename = "type")]
    kind: RoomKind,
    #[serde(default)]
    user_ids: Vec<UserId>,
}

#[debug_handler]
pub(crate) async fn new_room(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(NewRoomBody { name, kind, user_ids }): Json<NewRoomBody>,
) -> AppResult<impl IntoResponse> {
    let mut members: BTreeSet<UserId> = user_ids.into_iter().filter(|id| !id.is_empty()).collect();
    members.insert(user_id.clone());
    kind.validate_members(&members)?;

    if kind == RoomKind::Direct {
        let mut pair = members.iter().filter(|id| **id != user_id);
        if let Some(other) = pair.next() {
            if let Some(existing) = state.store.find_direct_room(&user_id, other).await? {
                return Ok(Json(json!({
                    "message": "Direct message room already exists",
                    "room": existing,
                })));
            }
        }
    }

    let name = name.trim();
    if name.is_empty() && kind == RoomKind::Group {
        return Err(ChatError::InvalidRequest("group rooms need a name".to_owned()).into());
    }

    let room = Room {
        id: Uuid::now_v7().to_string(),
        name: name.to_owned(),
        kind,
        created_at: OffsetDateTime::now_utc(),
    };
    state.store.create_room(&room, &members).await?;
    info!(room_id = %room.id, kind = %room.kind, members = members.len(), "room created");

    Ok(Json(json!({ "message": "Chat room created", "room": room })))
}
