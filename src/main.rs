use std::sync::Arc;

use tower_sessions::ExpiredDeletion;
use tower_sessions_sqlx_store::SqliteStore;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use news_portal::adapter::AdapterRegistry;
use news_portal::aggregator::FeedAggregator;
use news_portal::bootstrap::{initializers_from_config, SessionBootstrapper};
use news_portal::config::Config;
use news_portal::db::Database;
use news_portal::routes::{self, AppState};
use news_portal::session::session_layer;
use news_portal::store::NewsStore;
use news_portal::toggler::SubscriptionToggler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "news_portal=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("PORTAL_CONFIG").unwrap_or_else(|_| "portal.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded {} news definitions from {}", config.news.len(), config_path);

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:news_portal.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.sync_definitions(&config.news).await?;
    info!("Database initialized");

    let session_store = SqliteStore::new(db.pool().clone());
    session_store.migrate().await?;

    let store: Arc<dyn NewsStore> = Arc::new(db);
    let registry = AdapterRegistry::with_defaults()?;
    let initializers = initializers_from_config(&config.initializers)?;

    // Delete expired sessions in the background
    let deletion_store = session_store.clone();
    tokio::spawn(async move {
        if let Err(e) = deletion_store
            .continuously_delete_expired(tokio::time::Duration::from_secs(60))
            .await
        {
            error!("Session cleanup stopped: {}", e);
        }
    });
    let sessions = session_layer(
        session_store,
        time::Duration::minutes(config.session_timeout_minutes as i64),
        config.secure_cookies,
    );

    // Create app state
    let state = Arc::new(AppState {
        bootstrapper: SessionBootstrapper::new(store.clone(), initializers, config.default_items),
        aggregator: FeedAggregator::new(store.clone(), registry),
        toggler: SubscriptionToggler::new(store),
        user_token: config.user_token.clone(),
    });

    let app = routes::router(state, sessions);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Server starting on {}", config.bind);

    axum::serve(listener, app).await?;

    Ok(())
}
