//! REST API module.
//!
//! Request bodies are parsed leniently from raw bytes (the web client does not
//! always send a JSON content type), and every required field is checked up
//! front so a missing field is reported by name before anything is written.

mod content;
mod projects;
mod users;

pub use content::*;
pub use projects::*;
pub use users::*;

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::resolve_token;
use crate::errors::{AppError, AppErrorWithRevision};
use crate::AppState;

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
    pub revision_id: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, revision_id: i64) -> Self {
        Self {
            success: true,
            message: None,
            data,
            revision_id,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppErrorWithRevision>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, revision_id: i64) -> ApiResult<T> {
    Ok(ApiResponse::new(data, revision_id))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: AppError, revision_id: i64) -> ApiResult<T> {
    Err(AppErrorWithRevision {
        error: err,
        revision_id,
    })
}

/// Wrap a handler outcome with the revision current after it ran.
pub async fn respond<T: Serialize>(state: &AppState, result: Result<T, AppError>) -> ApiResult<T> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    match result {
        Ok(data) => success(data, revision_id),
        Err(e) => {
            if e.status_code().is_server_error() {
                tracing::error!("Request failed: {}", e);
            } else {
                tracing::debug!("Request rejected: {}", e);
            }
            error(e, revision_id)
        }
    }
}

/// Parse a JSON request body regardless of its declared content type.
pub fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

/// Report every absent field at once.
pub fn require_params(params: &[(&str, bool)]) -> Result<(), AppError> {
    let missing: Vec<&str> = params
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "The following params are missing: {}",
            missing.join(", ")
        )))
    }
}

/// A string field counts as present only when non-blank.
pub fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// A verified caller.
#[derive(Debug, Clone)]
pub struct Caller {
    pub uid: String,
}

/// Check presence of uid/token, then verify the token belongs to the uid.
///
/// `extra` lists additional required fields so all omissions are reported together.
pub fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    uid: &Option<String>,
    user_token: &Option<String>,
    extra: &[(&str, bool)],
) -> Result<Caller, AppError> {
    let token = resolve_token(user_token.as_deref(), headers);

    let mut params: Vec<(&str, bool)> = extra.to_vec();
    params.push(("uid", present(uid)));
    params.push(("userToken", token.is_some()));
    require_params(&params)?;

    let (Some(uid), Some(token)) = (uid.as_deref(), token) else {
        return Err(AppError::Validation("uid and userToken are required".to_string()));
    };

    state.identity.verify_uid_token(&token, uid)?;
    Ok(Caller {
        uid: uid.to_string(),
    })
}

/// Caller credentials and filters passed on the query string.
#[derive(Debug, Clone, Default)]
pub struct CallerQuery {
    pub uid: Option<String>,
    pub user_token: Option<String>,
    pub project_ids: Option<Vec<String>>,
}

impl CallerQuery {
    /// Accepts `projectIds[]=a&projectIds[]=b`, repeated `projectIds=a`, or `projectIds=a,b`.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = CallerQuery::default();
        for (key, value) in pairs {
            match key.as_str() {
                "uid" => query.uid = Some(value),
                "userToken" => query.user_token = Some(value),
                "projectIds" | "projectIds[]" => {
                    let ids = query.project_ids.get_or_insert_with(Vec::new);
                    ids.extend(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|id| !id.is_empty())
                            .map(str::to_string),
                    );
                }
                _ => {}
            }
        }
        // An empty filter does not narrow anything.
        if query.project_ids.as_ref().is_some_and(Vec::is_empty) {
            query.project_ids = None;
        }
        query
    }
}

/// GET / - Liveness text.
pub async fn liveness() -> &'static str {
    "API is working"
}

/// Fallback for unknown routes.
pub async fn not_found() -> Response {
    AppError::NotFound("Not found".to_string()).into_response()
}
