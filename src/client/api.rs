//! Typed wrapper over the REST endpoints.

use std::collections::BTreeMap;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::ClientError;
use crate::models::{
    Asset, AssetPayload, AssetsPayload, ContentPayload, ContentRevision, CreateLocaleRequest,
    CreateProjectRequest, CreateUserRequest, InvitedUser, LocalePayload, MetadataPatch,
    MetadataPayload, ProjectContent, ProjectIdsPayload, ProjectLocale, ProjectMetadata,
    ProjectPayload, ProjectsPayload, SchemaPayload, UpdateContentRequest, UpdateMetadataRequest,
    UpdateUserRequest, User, UserPayload, UsersPayload,
};

/// Credentials of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uid: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    code: String,
    message: String,
}

/// A decoded success response.
#[derive(Debug)]
pub struct Reply<T> {
    pub data: T,
    pub message: Option<String>,
}

/// HTTP client for the content manager backend.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Option<Session>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            session: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn set_session(&mut self, session: Option<Session>) {
        self.session = session;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn require_session(&self) -> Result<&Session, ClientError> {
        self.session.as_ref().ok_or(ClientError::NotSignedIn)
    }

    /// Attach the bearer token and the caller uid as a query parameter.
    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let session = self.require_session()?;
        Ok(request
            .bearer_auth(&session.token)
            .query(&[("uid", session.uid.as_str())]))
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Reply<T>, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => {
                return Err(ClientError::Api {
                    status: status.as_u16(),
                    code: "HTTP_ERROR".to_string(),
                    message: String::from_utf8_lossy(&bytes).into_owned(),
                })
            }
        };

        if !status.is_success() || !envelope.success {
            let (code, message) = match envelope.error {
                Some(err) => (err.code, err.message),
                None => (
                    "HTTP_ERROR".to_string(),
                    envelope.message.unwrap_or_else(|| status.to_string()),
                ),
            };
            return Err(ClientError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let data = envelope
            .data
            .ok_or_else(|| ClientError::Decode("response has no data".to_string()))?;
        Ok(Reply {
            data,
            message: envelope.message,
        })
    }

    // Users

    pub async fn create_user(
        &self,
        display_name: &str,
        email: &str,
        photo_url: &str,
    ) -> Result<User, ClientError> {
        let session = self.require_session()?;
        let body = CreateUserRequest {
            uid: Some(session.uid.clone()),
            user_token: Some(session.token.clone()),
            display_name: Some(display_name.to_string()),
            email: Some(email.to_string()),
            photo_url: Some(photo_url.to_string()),
        };
        let reply: Reply<UserPayload> = self
            .execute(self.http.put(self.url("/user")).json(&body))
            .await?;
        Ok(reply.data.user)
    }

    pub async fn get_user(&self, uid: &str) -> Result<User, ClientError> {
        let request = self.authorized(self.http.get(self.url(&format!("/user/{}", uid))))?;
        let reply: Reply<UserPayload> = self.execute(request).await?;
        Ok(reply.data.user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, ClientError> {
        let request = self.authorized(self.http.get(self.url("/users")))?;
        let reply: Reply<UsersPayload> = self.execute(request).await?;
        Ok(reply.data.users)
    }

    pub async fn update_user(
        &self,
        target_uid: &str,
        mut patch: UpdateUserRequest,
    ) -> Result<User, ClientError> {
        let session = self.require_session()?;
        patch.uid = Some(session.uid.clone());
        patch.user_token = Some(session.token.clone());
        let request = self
            .http
            .patch(self.url(&format!("/user/{}", target_uid)))
            .json(&patch);
        let reply: Reply<UserPayload> = self.execute(request).await?;
        Ok(reply.data.user)
    }

    // Projects

    /// Projects the signed-in user belongs to, optionally narrowed to `filter`.
    pub async fn list_projects(
        &self,
        filter: Option<&[String]>,
    ) -> Result<Vec<ProjectMetadata>, ClientError> {
        let mut request = self.authorized(self.http.get(self.url("/projects")))?;
        if let Some(ids) = filter {
            let pairs: Vec<(&str, &str)> = ids
                .iter()
                .map(|id| ("projectIds[]", id.as_str()))
                .collect();
            request = request.query(&pairs);
        }
        let reply: Reply<ProjectsPayload> = self.execute(request).await?;
        Ok(reply.data.projects)
    }

    pub async fn list_project_ids(&self) -> Result<Vec<String>, ClientError> {
        let request = self.authorized(self.http.get(self.url("/projectIds")))?;
        let reply: Reply<ProjectIdsPayload> = self.execute(request).await?;
        Ok(reply.data.project_ids)
    }

    pub async fn create_project(
        &self,
        name: &str,
        id: &str,
        users: &[InvitedUser],
        current_user_project_ids: &[String],
    ) -> Result<Reply<ProjectMetadata>, ClientError> {
        let session = self.require_session()?;
        let body = CreateProjectRequest {
            name: Some(name.to_string()),
            id: Some(id.to_string()),
            uid: Some(session.uid.clone()),
            user_token: Some(session.token.clone()),
            users: Some(users.to_vec()),
            current_user_project_ids: Some(current_user_project_ids.to_vec()),
        };
        let reply: Reply<ProjectPayload> = self
            .execute(self.http.put(self.url("/project")).json(&body))
            .await?;
        Ok(Reply {
            data: reply.data.project,
            message: reply.message,
        })
    }

    pub async fn update_project_metadata(
        &self,
        project_id: &str,
        patch: MetadataPatch,
    ) -> Result<ProjectMetadata, ClientError> {
        let session = self.require_session()?;
        let body = UpdateMetadataRequest {
            id: Some(project_id.to_string()),
            name: patch.name,
            relative_base_path: patch.relative_base_path,
            locales: patch.locales,
            user_roles: patch.user_roles,
            expected_version: patch.expected_version,
            uid: Some(session.uid.clone()),
            user_token: Some(session.token.clone()),
        };
        let request = self
            .http
            .patch(self.url("/project/updateMetadata"))
            .json(&body);
        let reply: Reply<MetadataPayload> = self.execute(request).await?;
        Ok(reply.data.metadata)
    }

    // Content

    pub async fn get_project_content(&self, project_id: &str) -> Result<ProjectContent, ClientError> {
        let request = self.authorized(
            self.http
                .get(self.url(&format!("/project/{}/content", project_id))),
        )?;
        let reply: Reply<ContentPayload> = self.execute(request).await?;
        Ok(reply.data.content)
    }

    pub async fn get_content_revision(
        &self,
        project_id: &str,
    ) -> Result<ContentRevision, ClientError> {
        let request = self.authorized(
            self.http
                .get(self.url(&format!("/project/{}/revision", project_id))),
        )?;
        let reply: Reply<ContentRevision> = self.execute(request).await?;
        Ok(reply.data)
    }

    pub async fn update_project_content(
        &self,
        project_id: &str,
        schema_url: Option<String>,
        locales: Option<BTreeMap<String, ProjectLocale>>,
    ) -> Result<ProjectContent, ClientError> {
        let session = self.require_session()?;
        let body = UpdateContentRequest {
            uid: Some(session.uid.clone()),
            user_token: Some(session.token.clone()),
            schema_url,
            locales,
        };
        let request = self
            .http
            .patch(self.url(&format!("/project/{}/content", project_id)))
            .json(&body);
        let reply: Reply<ContentPayload> = self.execute(request).await?;
        Ok(reply.data.content)
    }

    pub async fn create_locale(
        &self,
        project_id: &str,
        code: &str,
        name: &str,
        content: Option<Value>,
    ) -> Result<LocalePayload, ClientError> {
        let session = self.require_session()?;
        let body = CreateLocaleRequest {
            uid: Some(session.uid.clone()),
            user_token: Some(session.token.clone()),
            code: Some(code.to_string()),
            name: Some(name.to_string()),
            content,
        };
        let request = self
            .http
            .post(self.url(&format!("/project/{}/locales", project_id)))
            .json(&body);
        let reply: Reply<LocalePayload> = self.execute(request).await?;
        Ok(reply.data)
    }

    pub async fn upload_schema(
        &self,
        project_id: &str,
        schema: Vec<u8>,
    ) -> Result<SchemaPayload, ClientError> {
        let request = self.authorized(
            self.http
                .put(self.url(&format!("/project/{}/schema", project_id)))
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(schema),
        )?;
        let reply: Reply<SchemaPayload> = self.execute(request).await?;
        Ok(reply.data)
    }

    /// Download a schema document from its public URL.
    pub async fn fetch_schema(&self, schema_url: &str) -> Result<Value, ClientError> {
        let response = self.http.get(schema_url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn list_assets(&self, project_id: &str) -> Result<Vec<Asset>, ClientError> {
        let request = self.authorized(
            self.http
                .get(self.url(&format!("/project/{}/assets", project_id))),
        )?;
        let reply: Reply<AssetsPayload> = self.execute(request).await?;
        Ok(reply.data.assets)
    }

    pub async fn upload_asset(
        &self,
        project_id: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<Asset, ClientError> {
        let request = self.authorized(
            self.http
                .put(self.url(&format!("/project/{}/assets/{}", project_id, name)))
                .body(bytes),
        )?;
        let reply: Reply<AssetPayload> = self.execute(request).await?;
        Ok(reply.data.asset)
    }
}
