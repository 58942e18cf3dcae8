//! Who is calling. Every chat route runs behind [`CurrentUser`].

mod jwt;
mod session;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
    routing::post,
    Router,
};
use tower_sessions::Session;
use tracing::debug;

use crate::{appresult::AppError, db::UserId, error::{ChatError, ChatResult}, AppState};

pub use jwt::{Claims, JwtAuthenticator};

/// Session key holding the authenticated user id.
pub const USER_ID: &str = "user_id";

/// Turns a bearer credential into a user id.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: &str) -> ChatResult<UserId>;
}

pub fn router() -> Router<AppState> {
    Router::new().route("/session", post(session::login).delete(session::logout))
}

/// The caller, taken from the cookie session first and the
/// `Authorization: Bearer` header second.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await.ok();
        Ok(CurrentUser(resolve_user(state, session.as_ref(), &parts.headers, None).await?))
    }
}

/// Tries each credential source in order: session, bearer header, then the
/// explicit `token` (only the websocket upgrade passes one).
pub(crate) async fn resolve_user(
    state: &AppState,
    session: Option<&Session>,
    headers: &HeaderMap,
    token: Option<&str>,
) -> ChatResult<UserId> {
    if let Some(session) = session {
        match session.get::<UserId>(USER_ID).await {
            Ok(Some(user_id)) => return Ok(user_id),
            Ok(None) => {}
            Err(error) => debug!(%error, "unreadable session"),
        }
    }

    if let Some(bearer) = bearer_token(headers) {
        return state.auth.authenticate(bearer);
    }

    match token.filter(|t| !t.is_empty()) {
        Some(token) => state.auth.authenticate(token),
        None => Err(ChatError::Unauthorized("user not authenticated".to_owned())),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
