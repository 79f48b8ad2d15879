//! Project content, locale, schema and asset endpoints.
//!
//! All of these need at least editor access to the project.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
};

use super::{authenticate, parse_body, present, respond, ApiResult, Caller, CallerQuery};
use crate::auth::verify_project_access;
use crate::errors::AppError;
use crate::models::{
    validate_asset_name, AssetPayload, AssetsPayload, ContentPayload, ContentRevision,
    CreateLocaleRequest, Locale, LocalePayload, Role, SchemaPayload, UpdateContentRequest,
};
use crate::AppState;

/// Authenticate from the query string and check editor access.
async fn editor_from_query(
    state: &AppState,
    headers: &HeaderMap,
    pairs: Vec<(String, String)>,
    project_id: &str,
) -> Result<Caller, AppError> {
    let query = CallerQuery::from_pairs(pairs);
    let caller = authenticate(state, headers, &query.uid, &query.user_token, &[])?;
    verify_project_access(&state.repo, &caller.uid, project_id, Role::Editor).await?;
    Ok(caller)
}

/// GET /project/:id/content - Schema URL and locale content.
pub async fn get_project_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<ContentPayload> {
    let result: Result<ContentPayload, AppError> = async {
        editor_from_query(&state, &headers, pairs, &project_id).await?;
        let content = state
            .repo
            .get_project_content(&project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", project_id)))?;
        Ok(ContentPayload { content })
    }
    .await;

    respond(&state, result).await
}

/// GET /project/:id/revision - Content version for change detection.
pub async fn get_content_revision(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<ContentRevision> {
    let result: Result<ContentRevision, AppError> = async {
        editor_from_query(&state, &headers, pairs, &project_id).await?;
        state
            .repo
            .get_content_revision(&project_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", project_id)))
    }
    .await;

    respond(&state, result).await
}

/// PATCH /project/:id/content - Replace the schema URL and merge locales.
pub async fn update_project_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    body: Bytes,
) -> ApiResult<ContentPayload> {
    let result: Result<ContentPayload, AppError> = async {
        let request: UpdateContentRequest = parse_body(&body)?;
        let caller = authenticate(&state, &headers, &request.uid, &request.user_token, &[])?;
        verify_project_access(&state.repo, &caller.uid, &project_id, Role::Editor).await?;

        let content = state
            .repo
            .update_project_content(
                &project_id,
                request.schema_url.as_deref(),
                request.locales.as_ref(),
            )
            .await?;
        tracing::info!(project_id = %project_id, version = content.version, "Project content updated");

        Ok(ContentPayload { content })
    }
    .await;

    respond(&state, result).await
}

/// POST /project/:id/locales - Add a locale to metadata and content.
pub async fn create_locale(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    body: Bytes,
) -> ApiResult<LocalePayload> {
    let result: Result<LocalePayload, AppError> = async {
        let request: CreateLocaleRequest = parse_body(&body)?;
        let caller = authenticate(
            &state,
            &headers,
            &request.uid,
            &request.user_token,
            &[("code", present(&request.code)), ("name", present(&request.name))],
        )?;
        verify_project_access(&state.repo, &caller.uid, &project_id, Role::Editor).await?;

        let locale = Locale {
            code: request.code.unwrap_or_default().trim().to_string(),
            name: request.name.unwrap_or_default().trim().to_string(),
        };
        let (metadata, content) = state
            .repo
            .create_locale(&project_id, &locale, request.content)
            .await?;
        tracing::info!(project_id = %project_id, locale = %locale.code, "Locale created");

        Ok(LocalePayload { metadata, content })
    }
    .await;

    respond(&state, result).await
}

/// PUT /project/:id/schema - Upload the project's JSON schema.
pub async fn upload_schema(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    body: Bytes,
) -> ApiResult<SchemaPayload> {
    let result: Result<SchemaPayload, AppError> = async {
        editor_from_query(&state, &headers, pairs, &project_id).await?;

        let schema: serde_json::Value = serde_json::from_slice(&body)?;
        if !schema.is_object() {
            return Err(AppError::Validation(
                "Schema must be a JSON object".to_string(),
            ));
        }

        let schema_url = state.storage.put_schema(&project_id, &body).await?;
        state
            .repo
            .update_project_content(&project_id, Some(&schema_url), None)
            .await?;

        Ok(SchemaPayload { schema_url, schema })
    }
    .await;

    respond(&state, result).await
}

/// GET /project/:id/assets - List uploaded assets.
pub async fn list_assets(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<AssetsPayload> {
    let result: Result<AssetsPayload, AppError> = async {
        editor_from_query(&state, &headers, pairs, &project_id).await?;
        let assets = state.storage.list_assets(&project_id).await?;
        Ok(AssetsPayload { assets })
    }
    .await;

    respond(&state, result).await
}

/// PUT /project/:id/assets/:name - Upload an asset.
pub async fn upload_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((project_id, name)): Path<(String, String)>,
    Query(pairs): Query<Vec<(String, String)>>,
    body: Bytes,
) -> ApiResult<AssetPayload> {
    let result: Result<AssetPayload, AppError> = async {
        editor_from_query(&state, &headers, pairs, &project_id).await?;
        validate_asset_name(&name).map_err(AppError::Validation)?;
        let asset = state.storage.put_asset(&project_id, &name, &body).await?;
        Ok(AssetPayload { asset })
    }
    .await;

    respond(&state, result).await
}
