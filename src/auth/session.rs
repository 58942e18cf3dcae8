use axum::{debug_handler, extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;
use tracing::info;

use crate::{AppResult, AppState};

use super::USER_ID;

#[derive(Deserialize)]
pub(crate) struct LoginBody {
    token: String,
}

/// Trades a bearer token for a cookie session.
#[debug_handler]
pub(crate) async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(LoginBody { token }): Json<LoginBody>,
) -> AppResult<impl IntoResponse> {
    let user_id = state.auth.authenticate(&token)?;

    session.cycle_id().await?;
    session.insert(USER_ID, &user_id).await?;
    info!(user_id = %user_id, "session opened");

    Ok(Json(json!({ "message": "Session created", "user_id": user_id })))
}

#[debug_handler]
pub(crate) async fn logout(session: Session) -> AppResult<StatusCode> {
    session.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}
