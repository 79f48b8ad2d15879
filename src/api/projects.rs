//! Project API endpoints: creation, metadata updates, listing and the registry.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
};

use super::{authenticate, parse_body, present, respond, ApiResult, CallerQuery};
use crate::auth::verify_project_access;
use crate::db::NewProject;
use crate::errors::AppError;
use crate::models::{
    validate_project_id, CreateProjectRequest, MetadataPatch, MetadataPayload, ProjectIdsPayload,
    ProjectPayload, ProjectsPayload, Role, UpdateMetadataRequest,
};
use crate::AppState;

/// GET /projects - Projects the caller is a member of.
pub async fn list_projects(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<ProjectsPayload> {
    let query = CallerQuery::from_pairs(pairs);
    let result: Result<ProjectsPayload, AppError> = async {
        let caller = authenticate(&state, &headers, &query.uid, &query.user_token, &[])?;
        let projects = state
            .repo
            .list_projects_for_user(&caller.uid, query.project_ids.as_deref())
            .await?;
        Ok(ProjectsPayload { projects })
    }
    .await;

    respond(&state, result).await
}

/// PUT|POST /project - Create a project.
pub async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<ProjectPayload> {
    let result: Result<ProjectPayload, AppError> = async {
        let request: CreateProjectRequest = parse_body(&body)?;
        let caller = authenticate(
            &state,
            &headers,
            &request.uid,
            &request.user_token,
            &[
                ("name", present(&request.name)),
                ("id", present(&request.id)),
                ("users", request.users.is_some()),
                (
                    "currentUserProjectIds",
                    request.current_user_project_ids.is_some(),
                ),
            ],
        )?;

        let (Some(name), Some(id), Some(users), Some(current_ids)) = (
            request.name.as_deref(),
            request.id.as_deref(),
            request.users.as_deref(),
            request.current_user_project_ids.as_deref(),
        ) else {
            return Err(AppError::Validation("Not all params are present".to_string()));
        };

        validate_project_id(id).map_err(AppError::Validation)?;
        if users.iter().any(|user| user.uid.trim().is_empty()) {
            return Err(AppError::Validation(
                "Every invited user needs a uid".to_string(),
            ));
        }

        let (project, _registry) = state
            .repo
            .create_project(&NewProject {
                id,
                name,
                creator_uid: &caller.uid,
                creator_project_ids: current_ids,
                invited: users,
            })
            .await?;

        Ok(ProjectPayload { project })
    }
    .await;

    respond(&state, result).await.map(|response| {
        let message = format!(
            "Created new project – {} – successfully",
            response.data.project.name
        );
        response.with_message(message)
    })
}

/// PATCH|POST /project/updateMetadata - Merge-update project metadata.
pub async fn update_project_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<MetadataPayload> {
    let result: Result<MetadataPayload, AppError> = async {
        let request: UpdateMetadataRequest = parse_body(&body)?;
        let caller = authenticate(
            &state,
            &headers,
            &request.uid,
            &request.user_token,
            &[("id", present(&request.id))],
        )?;
        let id = request.id.clone().unwrap_or_default();

        verify_project_access(&state.repo, &caller.uid, &id, Role::Owner).await?;

        // Credentials never reach the stored record.
        let patch = MetadataPatch::from(request);
        let metadata = state.repo.update_project_metadata(&id, &patch).await?;
        tracing::info!(project_id = %id, uid = %caller.uid, "Project metadata updated");

        Ok(MetadataPayload { metadata })
    }
    .await;

    respond(&state, result)
        .await
        .map(|response| response.with_message("Project metadata updated"))
}

/// GET /projectIds - The global registry in index order.
pub async fn list_project_ids(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<ProjectIdsPayload> {
    let query = CallerQuery::from_pairs(pairs);
    let result: Result<ProjectIdsPayload, AppError> = async {
        authenticate(&state, &headers, &query.uid, &query.user_token, &[])?;
        let entries = state.repo.list_registry().await?;
        Ok(ProjectIdsPayload {
            project_ids: entries.into_iter().map(|entry| entry.project_id).collect(),
        })
    }
    .await;

    respond(&state, result).await
}
