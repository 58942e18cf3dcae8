use std::sync::Arc;

use roomcast::{
    auth::JwtAuthenticator,
    config::Config,
    db::{ChatStore, InMemoryStore, SqliteStore},
    AppState,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn ChatStore> = if config.database_url == "memory" {
        info!("using in-memory store");
        Arc::new(InMemoryStore::new())
    } else {
        info!(database_url = %config.database_url, "using sqlite store");
        Arc::new(SqliteStore::connect(&config.database_url).await?)
    };

    let app_state = AppState::new(
        store,
        Arc::new(JwtAuthenticator::new(&config.jwt_secret)),
        config.session.clone(),
    );
    let app = roomcast::app(app_state, time::Duration::minutes(config.session_inactivity_minutes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
