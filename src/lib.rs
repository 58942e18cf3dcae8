pub mod appresult;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod ids;
pub mod rooms;
pub mod ws;

use std::sync::Arc;

use axum::{extract::FromRef, Router};
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use appresult::{AppError, AppResult};

use auth::Authenticator;
use db::ChatStore;
use ids::IdGenerator;
use ws::{Broadcaster, Hub, SessionSettings};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub broadcaster: Broadcaster,
    pub auth: Arc<dyn Authenticator>,
    pub ids: Arc<IdGenerator>,
    /// Held from id assignment until the message is stored and fanned out.
    pub append_lock: Arc<Mutex<()>>,
    pub settings: SessionSettings,
}

impl AppState {
    pub fn new(store: Arc<dyn ChatStore>, auth: Arc<dyn Authenticator>, settings: SessionSettings) -> Self {
        Self {
            store,
            broadcaster: Broadcaster::default(),
            auth,
            ids: Arc::new(IdGenerator::new()),
            append_lock: Arc::new(Mutex::new(())),
            settings,
        }
    }

    pub fn hub(&self) -> Hub {
        Hub {
            broadcaster: self.broadcaster.clone(),
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
        }
    }
}

pub fn app(app_state: AppState, session_inactivity: time::Duration) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(session_inactivity));

    Router::new()
        .nest("/auth", auth::router())
        .nest("/chat", rooms::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
