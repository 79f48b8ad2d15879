//! Client-side state: the signed-in user, their projects and the open project.
//!
//! Every mutation goes to the backend first and then re-fetches whatever
//! collections depend on it, so the mirror never diverges from the server.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use super::{ApiClient, ClientError, ProjectSubscription, Session};
use crate::models::{
    Asset, InvitedUser, MetadataPatch, ProjectContent, ProjectLocale, ProjectMetadata, Role,
    UpdateUserRequest, User,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Profile supplied by the identity provider at sign-in.
#[derive(Debug, Clone, Default)]
pub struct SignInProfile {
    pub uid: String,
    pub token: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

/// A project member with the role the project grants them.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectMember {
    pub user: User,
    pub role: Role,
}

/// Project metadata with its role map expanded to full users.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSummary {
    pub metadata: ProjectMetadata,
    pub users: Vec<ProjectMember>,
}

/// The project open for editing.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentProject {
    pub metadata: ProjectMetadata,
    pub content: ProjectContent,
    /// Last asset listing, refreshed by `get_project_assets` and `upload_asset`
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Default)]
pub struct UserState {
    pub current_user: Option<User>,
    pub users: Vec<User>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    pub user_projects: Vec<ProjectSummary>,
    pub current_project: Option<CurrentProject>,
    pub project_ids: Vec<String>,
    pub current_project_schema: Option<Value>,
}

/// Changes to the open project's content.
#[derive(Debug, Clone, Default)]
pub struct ContentPatch {
    pub schema_url: Option<String>,
    pub locales: Option<BTreeMap<String, ProjectLocale>>,
}

/// Owns the API client and the mirrored state.
pub struct Workspace {
    api: ApiClient,
    poll_interval: Duration,
    user: UserState,
    projects: ProjectState,
    subscription: Option<ProjectSubscription>,
}

impl Workspace {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            poll_interval: DEFAULT_POLL_INTERVAL,
            user: UserState::default(),
            projects: ProjectState::default(),
            subscription: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn user_state(&self) -> &UserState {
        &self.user
    }

    pub fn project_state(&self) -> &ProjectState {
        &self.projects
    }

    pub fn subscription(&self) -> Option<&ProjectSubscription> {
        self.subscription.as_ref()
    }

    fn current_uid(&self) -> Result<String, ClientError> {
        self.api
            .session()
            .map(|s| s.uid.clone())
            .ok_or(ClientError::NotSignedIn)
    }

    fn current_project_id(&self) -> Result<String, ClientError> {
        self.projects
            .current_project
            .as_ref()
            .map(|p| p.metadata.id.clone())
            .ok_or(ClientError::NoCurrentProject)
    }

    // Users

    /// Start a session. New users are registered before being loaded.
    pub async fn sign_in(
        &mut self,
        profile: SignInProfile,
        is_new_user: bool,
    ) -> Result<&User, ClientError> {
        let missing: Vec<&'static str> = [
            ("displayName", &profile.display_name),
            ("email", &profile.email),
            ("photoUrl", &profile.photo_url),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(ClientError::MissingParams(missing));
        }

        self.api.set_session(Some(Session {
            uid: profile.uid.clone(),
            token: profile.token,
        }));

        if is_new_user {
            self.api
                .create_user(
                    profile.display_name.as_deref().unwrap_or_default(),
                    profile.email.as_deref().unwrap_or_default(),
                    profile.photo_url.as_deref().unwrap_or_default(),
                )
                .await?;
        }

        let user = self.api.get_user(&profile.uid).await?;
        tracing::debug!(uid = %user.uid, "Signed in");
        Ok(self.user.current_user.insert(user))
    }

    /// End the session and forget all mirrored state.
    pub fn sign_out(&mut self) {
        self.reset_current_project();
        self.user = UserState::default();
        self.projects = ProjectState::default();
        self.api.set_session(None);
    }

    pub async fn fetch_all_users(&mut self) -> Result<&[User], ClientError> {
        let users = self.api.list_users().await?;
        self.store_users(users)?;
        Ok(&self.user.users)
    }

    fn store_users(&mut self, users: Vec<User>) -> Result<(), ClientError> {
        let uid = self.current_uid()?;
        if let Some(me) = users.iter().find(|u| u.uid == uid) {
            self.user.current_user = Some(me.clone());
        }
        self.user.users = users;
        Ok(())
    }

    /// Merge-update a user, then refresh the user list.
    pub async fn update_user(
        &mut self,
        target_uid: &str,
        patch: UpdateUserRequest,
    ) -> Result<User, ClientError> {
        let updated = self.api.update_user(target_uid, patch).await?;
        if target_uid == self.current_uid()? {
            self.user.current_user = Some(self.api.get_user(target_uid).await?);
        }
        self.fetch_all_users().await?;
        Ok(updated)
    }

    // Projects

    /// Refresh the registry and the caller's projects.
    pub async fn sync_projects_metadata(&mut self) -> Result<&[ProjectSummary], ClientError> {
        let (project_ids, projects) =
            tokio::try_join!(self.api.list_project_ids(), self.api.list_projects(None))?;
        self.store_projects(project_ids, projects);
        Ok(&self.projects.user_projects)
    }

    fn store_projects(&mut self, project_ids: Vec<String>, projects: Vec<ProjectMetadata>) {
        self.projects.project_ids = project_ids;
        self.projects.user_projects = projects
            .into_iter()
            .map(|metadata| expand_members(metadata, &self.user.users))
            .collect();

        // Keep the open project's metadata in step with the list.
        if let Some(current) = self.projects.current_project.as_mut() {
            if let Some(summary) = self
                .projects
                .user_projects
                .iter()
                .find(|p| p.metadata.id == current.metadata.id)
            {
                current.metadata = summary.metadata.clone();
            }
        }
    }

    /// Create a project, then refresh users and projects together.
    pub async fn create_new_project(
        &mut self,
        name: &str,
        id: &str,
        invited: &[InvitedUser],
    ) -> Result<ProjectMetadata, ClientError> {
        let current_ids = self
            .user
            .current_user
            .as_ref()
            .and_then(|u| u.project_ids.clone())
            .unwrap_or_default();

        let reply = self
            .api
            .create_project(name, id, invited, &current_ids)
            .await?;
        if let Some(message) = &reply.message {
            tracing::info!("{}", message);
        }

        let (users, project_ids, projects) = tokio::try_join!(
            self.api.list_users(),
            self.api.list_project_ids(),
            self.api.list_projects(None),
        )?;
        self.store_users(users)?;
        self.store_projects(project_ids, projects);

        Ok(reply.data)
    }

    /// Open a project: load metadata, content and schema and go live.
    pub async fn set_current_project(
        &mut self,
        project_id: &str,
    ) -> Result<&CurrentProject, ClientError> {
        self.reset_current_project();

        let filter = [project_id.to_string()];
        let (mut projects, content) = tokio::try_join!(
            self.api.list_projects(Some(&filter[..])),
            self.api.get_project_content(project_id),
        )?;
        let metadata = projects.pop().ok_or_else(|| ClientError::Api {
            status: 404,
            code: "NOT_FOUND".to_string(),
            message: format!("Project {} not found", project_id),
        })?;

        let schema = match &content.schema_url {
            Some(url) => Some(self.api.fetch_schema(url).await?),
            None => None,
        };

        self.subscription = Some(ProjectSubscription::spawn(
            self.api.clone(),
            project_id,
            content.version,
            self.poll_interval,
        ));
        self.projects.current_project_schema = schema;
        Ok(self
            .projects
            .current_project
            .insert(CurrentProject {
                metadata,
                content,
                assets: Vec::new(),
            }))
    }

    /// Close the open project and stop its subscription.
    pub fn reset_current_project(&mut self) {
        self.subscription = None;
        self.projects.current_project = None;
        self.projects.current_project_schema = None;
    }

    /// Wait for the next live snapshot of the open project and apply it.
    pub async fn apply_project_update(&mut self) -> Result<&CurrentProject, ClientError> {
        let subscription = self
            .subscription
            .as_mut()
            .ok_or(ClientError::NoCurrentProject)?;
        let content = subscription.next().await?;
        self.apply_content(content).await
    }

    async fn apply_content(
        &mut self,
        content: ProjectContent,
    ) -> Result<&CurrentProject, ClientError> {
        let current = self
            .projects
            .current_project
            .as_mut()
            .ok_or(ClientError::NoCurrentProject)?;

        if current.content.schema_url != content.schema_url {
            self.projects.current_project_schema = match &content.schema_url {
                Some(url) => Some(self.api.fetch_schema(url).await?),
                None => None,
            };
        }
        current.content = content;
        Ok(current)
    }

    /// Update the open project's content, then refresh the project list.
    pub async fn update_project(
        &mut self,
        patch: ContentPatch,
    ) -> Result<&CurrentProject, ClientError> {
        let project_id = self.current_project_id()?;
        let content = self
            .api
            .update_project_content(&project_id, patch.schema_url, patch.locales)
            .await?;
        self.sync_projects_metadata().await?;
        self.apply_content(content).await
    }

    /// Merge-update a project's metadata, then refresh the project list.
    pub async fn update_projects_metadata(
        &mut self,
        project_id: &str,
        patch: MetadataPatch,
    ) -> Result<ProjectMetadata, ClientError> {
        let metadata = self.api.update_project_metadata(project_id, patch).await?;
        if let Some(current) = self
            .projects
            .current_project
            .as_mut()
            .filter(|p| p.metadata.id == project_id)
        {
            current.metadata = metadata.clone();
        }
        self.sync_projects_metadata().await?;
        Ok(metadata)
    }

    /// Add a locale to the open project.
    pub async fn create_new_locale(
        &mut self,
        code: &str,
        name: &str,
        content: Option<Value>,
    ) -> Result<&CurrentProject, ClientError> {
        let project_id = self.current_project_id()?;
        let payload = self
            .api
            .create_locale(&project_id, code, name, content)
            .await?;

        if let Some(current) = self.projects.current_project.as_mut() {
            current.metadata = payload.metadata;
            current.content = payload.content;
        }
        self.sync_projects_metadata().await?;
        self.projects
            .current_project
            .as_ref()
            .ok_or(ClientError::NoCurrentProject)
    }

    /// Upload a schema for the open project and return its public URL.
    pub async fn upload_schema(&mut self, schema: Vec<u8>) -> Result<String, ClientError> {
        let project_id = self.current_project_id()?;
        let payload = self.api.upload_schema(&project_id, schema).await?;
        let content = self.api.get_project_content(&project_id).await?;

        if let Some(current) = self.projects.current_project.as_mut() {
            current.content = content;
        }
        self.projects.current_project_schema = Some(payload.schema);
        Ok(payload.schema_url)
    }

    /// List the open project's assets and keep the listing on it.
    pub async fn get_project_assets(&mut self) -> Result<&[Asset], ClientError> {
        let project_id = self.current_project_id()?;
        let assets = self.api.list_assets(&project_id).await?;
        let current = self
            .projects
            .current_project
            .as_mut()
            .ok_or(ClientError::NoCurrentProject)?;
        current.assets = assets;
        Ok(&current.assets)
    }

    /// Upload an asset to the open project, then re-list its assets.
    pub async fn upload_asset(
        &mut self,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<Asset, ClientError> {
        let project_id = self.current_project_id()?;
        let asset = self.api.upload_asset(&project_id, name, bytes).await?;
        self.get_project_assets().await?;
        Ok(asset)
    }

    /// The open project's content for one locale.
    pub fn get_current_project_content(&self, code: &str) -> Option<&ProjectLocale> {
        self.projects
            .current_project
            .as_ref()
            .and_then(|p| p.content.locales.get(code))
    }
}

/// Replace role-map uids with the users they name. Unknown uids are skipped.
fn expand_members(metadata: ProjectMetadata, users: &[User]) -> ProjectSummary {
    let members = metadata
        .user_roles
        .iter()
        .filter_map(|(uid, role)| {
            users.iter().find(|u| &u.uid == uid).map(|user| ProjectMember {
                user: user.clone(),
                role: *role,
            })
        })
        .collect();
    ProjectSummary {
        metadata,
        users: members,
    }
}
