use axum::{
    debug_handler,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
    Json,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_sessions::Session;
use tracing::{debug, info};

use crate::{auth::{self, CurrentUser}, ws::run_session, AppResult, AppState};

#[derive(Deserialize)]
pub(crate) struct ConnectQuery {
    token: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct StatsQuery {
    room_id: Option<String>,
}

/// Authenticates before upgrading, so a rejected handshake never reaches the
/// registry.
#[debug_handler]
pub(crate) async fn connect(
    State(state): State<AppState>,
    Query(ConnectQuery { token }): Query<ConnectQuery>,
    headers: HeaderMap,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = auth::resolve_user(&state, Some(&session), &headers, token.as_deref())
        .await
        .inspect_err(|error| debug!(%error, "websocket handshake rejected"))?;

    let hub = state.hub();
    let max_message_bytes = hub.settings.max_message_bytes;
    info!(user_id = %user_id, "websocket upgrade");

    Ok(ws
        .max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            run_session(hub, user_id, sink, stream).await;
        }))
}

#[debug_handler]
pub(crate) async fn stats(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Query(StatsQuery { room_id }): Query<StatsQuery>,
) -> Json<Value> {
    let registry = state.broadcaster.registry();
    let mut body = json!({ "total_connected_clients": registry.connection_count() });
    if let Some(room_id) = room_id.filter(|r| !r.is_empty()) {
        body["room_id"] = json!(room_id);
        body["room_clients"] = json!(registry.room_subscriber_count(&room_id));
    }
    Json(body)
}
