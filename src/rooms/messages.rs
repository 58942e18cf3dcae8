use axum::{debug_handler, extract::{Path, Query, State}, Json};
use serde::Serialize;

use crate::{
    auth::CurrentUser,
    db::UserId,
    history::{self, Page, PageQuery},
    AppResult, AppState,
};

use super::{find_or_create_direct, member_room};

#[derive(Serialize)]
pub(crate) struct PageResponse {
    message: &'static str,
    room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient_id: Option<UserId>,
    limit: usize,
    #[serde(flatten)]
    page: Page,
}

/// Older messages, newest first. `cursor` is the last id the client holds.
#[debug_handler]
pub(crate) async fn room_messages(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<PageResponse>> {
    member_room(&*state.store, &room_id, &user_id).await?;
    let (cursor, limit) = (query.cursor()?, query.limit());
    let page = history::page(&*state.store, &room_id, cursor, limit).await?;

    Ok(Json(PageResponse {
        message: "Messages retrieved",
        room_id,
        recipient_id: None,
        limit,
        page,
    }))
}

/// Messages after `cursor`, oldest first, for catching up.
#[debug_handler]
pub(crate) async fn new_room_messages(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<PageResponse>> {
    member_room(&*state.store, &room_id, &user_id).await?;
    let (cursor, limit) = (query.cursor()?, query.limit());
    let page = history::page_forward(&*state.store, &room_id, cursor, limit).await?;

    Ok(Json(PageResponse {
        message: "New messages retrieved",
        room_id,
        recipient_id: None,
        limit,
        page,
    }))
}

#[debug_handler]
pub(crate) async fn direct_messages(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(recipient_id): Path<UserId>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<PageResponse>> {
    let (cursor, limit) = (query.cursor()?, query.limit());
    let room = find_or_create_direct(&*state.store, &user_id, &recipient_id).await?;
    let page = history::page(&*state.store, &room.id, cursor, limit).await?;

    Ok(Json(PageResponse {
        message: "Direct messages retrieved",
        room_id: room.id,
        recipient_id: Some(recipient_id),
        limit,
        page,
    }))
}
