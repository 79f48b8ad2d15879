//! Content Manager Backend
//!
//! REST backend for a multi-tenant content manager, with SQLite persistence,
//! local object storage, identity-token verification and a typed client that
//! mirrors server state.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod storage;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, patch, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use auth::IdentityVerifier;
use config::Config;
use db::Repository;
use storage::ObjectStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub identity: Arc<IdentityVerifier>,
    pub storage: Arc<ObjectStore>,
    pub config: Arc<Config>,
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let files = ServeDir::new(state.storage.root());

    let api_routes = Router::new()
        // Projects
        .route("/projects", get(api::list_projects))
        .route(
            "/project",
            put(api::create_project)
                .post(api::create_project)
                .patch(api::update_project_metadata),
        )
        .route("/create-project", post(api::create_project))
        .route(
            "/project/updateMetadata",
            patch(api::update_project_metadata).post(api::update_project_metadata),
        )
        .route("/projectIds", get(api::list_project_ids))
        // Content
        .route(
            "/project/{id}/content",
            get(api::get_project_content).patch(api::update_project_content),
        )
        .route("/project/{id}/revision", get(api::get_content_revision))
        .route("/project/{id}/locales", post(api::create_locale))
        .route("/project/{id}/schema", put(api::upload_schema))
        .route("/project/{id}/assets", get(api::list_assets))
        .route("/project/{id}/assets/{name}", put(api::upload_asset))
        // Users
        .route("/user", put(api::create_user).post(api::create_user))
        .route("/user/create", post(api::create_user))
        .route("/user/{uid}", get(api::get_user).patch(api::update_user))
        .route("/users", get(api::list_users))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes));

    Router::new()
        .route("/", get(api::liveness))
        .route("/health", get(health_check))
        .merge(api_routes)
        .nest_service("/files", files)
        .fallback(api::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.allowed_origins)),
        )
        .with_state(state)
}

/// CORS for the configured origins, or any origin when none are configured.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
