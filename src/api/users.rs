//! User API endpoints.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
};

use super::{authenticate, parse_body, present, respond, ApiResult, CallerQuery};
use crate::db::{UserPatch, UserProfile};
use crate::errors::AppError;
use crate::models::{CreateUserRequest, UpdateUserRequest, UserPayload, UserRole, UsersPayload};
use crate::AppState;

/// PUT|POST /user - Register a user or refresh their profile.
pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<UserPayload> {
    let result: Result<UserPayload, AppError> = async {
        let request: CreateUserRequest = parse_body(&body)?;
        let caller = authenticate(
            &state,
            &headers,
            &request.uid,
            &request.user_token,
            &[
                ("displayName", present(&request.display_name)),
                ("email", present(&request.email)),
                ("photoUrl", present(&request.photo_url)),
            ],
        )?;

        let user = state
            .repo
            .upsert_user_profile(&UserProfile {
                uid: &caller.uid,
                display_name: request.display_name.as_deref().unwrap_or_default(),
                email: request.email.as_deref().unwrap_or_default(),
                photo_url: request.photo_url.as_deref().unwrap_or_default(),
            })
            .await?;
        tracing::info!(uid = %user.uid, "User registered");

        Ok(UserPayload { user })
    }
    .await;

    respond(&state, result).await
}

/// PATCH /user/:uid - Merge-update a user.
///
/// Users may edit their own profile. Editing someone else, or any role tag,
/// takes an admin.
pub async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(target_uid): Path<String>,
    body: Bytes,
) -> ApiResult<UserPayload> {
    let result: Result<UserPayload, AppError> = async {
        let request: UpdateUserRequest = parse_body(&body)?;
        let caller = authenticate(&state, &headers, &request.uid, &request.user_token, &[])?;

        if caller.uid != target_uid || request.role.is_some() {
            let caller_role = state
                .repo
                .get_user(&caller.uid)
                .await?
                .and_then(|user| user.role);
            if caller_role != Some(UserRole::Admin) {
                return Err(AppError::Forbidden(
                    "Only admins can change other users or roles".to_string(),
                ));
            }
        }

        let user = state
            .repo
            .update_user(
                &target_uid,
                &UserPatch {
                    display_name: request.display_name,
                    email: request.email,
                    photo_url: request.photo_url,
                    role: request.role,
                },
            )
            .await?;

        Ok(UserPayload { user })
    }
    .await;

    respond(&state, result).await
}

/// GET /users - All users, for expanding project role maps.
pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<UsersPayload> {
    let query = CallerQuery::from_pairs(pairs);
    let result: Result<UsersPayload, AppError> = async {
        authenticate(&state, &headers, &query.uid, &query.user_token, &[])?;
        let users = state.repo.list_users().await?;
        Ok(UsersPayload { users })
    }
    .await;

    respond(&state, result).await
}

/// GET /user/:uid - A single user.
pub async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(target_uid): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<UserPayload> {
    let query = CallerQuery::from_pairs(pairs);
    let result: Result<UserPayload, AppError> = async {
        authenticate(&state, &headers, &query.uid, &query.user_token, &[])?;
        let user = state
            .repo
            .get_user(&target_uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", target_uid)))?;
        Ok(UserPayload { user })
    }
    .await;

    respond(&state, result).await
}
