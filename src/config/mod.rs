//! Configuration module for the content manager backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::errors::AppError;

/// Default upload limit for schema and asset files (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Root directory of the object storage tree
    pub storage_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Base URL used when building public file URLs
    pub public_base_url: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Shared secret the identity provider signs user tokens with
    pub idp_secret: Option<String>,
    /// Expected `iss` claim, if any
    pub idp_issuer: Option<String>,
    /// Expected `aud` claim, if any
    pub idp_audience: Option<String>,
    /// CORS origins; any origin when empty
    pub allowed_origins: Vec<String>,
    /// Request body limit for uploads
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("CMS_DB_PATH")
            .unwrap_or_else(|_| "./data/app.sqlite".to_string())
            .into();

        let storage_path = env::var("CMS_STORAGE_PATH")
            .unwrap_or_else(|_| "./data/storage".to_string())
            .into();

        let bind_addr: SocketAddr = env::var("CMS_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid CMS_BIND_ADDR format: {}", e)))?;

        let public_base_url = env::var("CMS_PUBLIC_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| format!("http://{}", bind_addr));

        let log_level = env::var("CMS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let idp_secret = non_empty_var("CMS_IDP_SECRET");
        let idp_issuer = non_empty_var("CMS_IDP_ISSUER");
        let idp_audience = non_empty_var("CMS_IDP_AUDIENCE");

        let allowed_origins = env::var("CMS_ALLOWED_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or_default();

        let max_upload_bytes = match env::var("CMS_MAX_UPLOAD_BYTES") {
            Ok(raw) => raw.parse().map_err(|e| {
                AppError::Internal(format!("Invalid CMS_MAX_UPLOAD_BYTES value: {}", e))
            })?,
            Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            db_path,
            storage_path,
            bind_addr,
            public_base_url,
            log_level,
            idp_secret,
            idp_issuer,
            idp_audience,
            allowed_origins,
            max_upload_bytes,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
