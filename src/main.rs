//! Content Manager Backend server entry point.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use content_manager::auth::IdentityVerifier;
use content_manager::config::Config;
use content_manager::db::{self, Repository};
use content_manager::storage::ObjectStore;
use content_manager::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Content Manager Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Storage path: {:?}", config.storage_path);
    tracing::info!("Public base URL: {}", config.public_base_url);
    tracing::info!("Bind address: {}", config.bind_addr);

    let identity = IdentityVerifier::from_config(&config);
    if !identity.is_configured() {
        tracing::warn!(
            "No identity provider secret configured (CMS_IDP_SECRET). All authenticated requests will be rejected!"
        );
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Initialize object storage
    let storage = Arc::new(ObjectStore::open(&config.storage_path, &config.public_base_url).await?);

    let state = AppState {
        repo,
        identity: Arc::new(identity),
        storage,
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
