//! Project models: metadata, role map, content and the id registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::InvitedUser;

/// Per-project role of a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
        }
    }

    /// Whether holding `self` is enough for an action that requires `required`.
    pub fn grants(&self, required: Role) -> bool {
        match required {
            Role::Owner => *self == Role::Owner,
            Role::Editor => true,
        }
    }
}

/// Mapping from user id to project role.
pub type RoleMap = BTreeMap<String, Role>;

/// A language/region variant of a project's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Locale {
    pub code: String,
    pub name: String,
}

/// Project metadata record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub id: String,
    pub name: String,
    pub relative_base_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locales: Option<Vec<Locale>>,
    pub user_roles: RoleMap,
    #[serde(default)]
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl ProjectMetadata {
    pub fn role_of(&self, uid: &str) -> Option<Role> {
        self.user_roles.get(uid).copied()
    }
}

/// Content of one locale: display name plus an arbitrary JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectLocale {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

/// Editable content of a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContent {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_url: Option<String>,
    #[serde(default)]
    pub locales: BTreeMap<String, ProjectLocale>,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub version: i64,
}

/// Change-detection probe for a project's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContentRevision {
    pub project_id: String,
    pub version: i64,
    pub updated_at: String,
}

/// One row of the global project-id registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub index: i64,
    pub project_id: String,
}

/// Request body for creating a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub user_token: Option<String>,
    #[serde(default)]
    pub users: Option<Vec<InvitedUser>>,
    #[serde(default)]
    pub current_user_project_ids: Option<Vec<String>>,
}

/// Request body for a merge update of project metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetadataRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_base_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locales: Option<Vec<Locale>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_roles: Option<RoleMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<i64>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub user_token: Option<String>,
}

/// The metadata fields of an update, with caller credentials stripped.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub name: Option<String>,
    pub relative_base_path: Option<String>,
    pub locales: Option<Vec<Locale>>,
    pub user_roles: Option<RoleMap>,
    pub expected_version: Option<i64>,
}

impl From<UpdateMetadataRequest> for MetadataPatch {
    fn from(request: UpdateMetadataRequest) -> Self {
        Self {
            name: request.name,
            relative_base_path: request.relative_base_path,
            locales: request.locales,
            user_roles: request.user_roles,
            expected_version: request.expected_version,
        }
    }
}

/// Request body for a content update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContentRequest {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub user_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locales: Option<BTreeMap<String, ProjectLocale>>,
}

/// Request body for adding a locale to a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLocaleRequest {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub user_token: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsPayload {
    pub projects: Vec<ProjectMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPayload {
    pub project: ProjectMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPayload {
    pub metadata: ProjectMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPayload {
    pub content: ProjectContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalePayload {
    pub metadata: ProjectMetadata,
    pub content: ProjectContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIdsPayload {
    pub project_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaPayload {
    pub schema_url: String,
    pub schema: serde_json::Value,
}

/// Build the role map for a new project: creator is owner, everyone else editor.
pub fn initial_role_map(creator: &str, invited: &[InvitedUser]) -> RoleMap {
    let mut roles: RoleMap = invited
        .iter()
        .map(|user| (user.uid.clone(), Role::Editor))
        .collect();
    roles.insert(creator.to_string(), Role::Owner);
    roles
}

/// Drop repeated `{code, name}` entries, keeping first occurrences in order.
pub fn dedupe_locales(locales: Vec<Locale>) -> Vec<Locale> {
    let mut unique: Vec<Locale> = Vec::with_capacity(locales.len());
    for locale in locales {
        if !unique.contains(&locale) {
            unique.push(locale);
        }
    }
    unique
}

/// Append `id` to a membership list unless it is already present.
pub fn append_project_id(ids: &[String], id: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len() + 1);
    for existing in ids.iter().map(String::as_str).chain(std::iter::once(id)) {
        if !out.iter().any(|seen| seen == existing) {
            out.push(existing.to_string());
        }
    }
    out
}

/// Project ids double as storage keys and URL path segments, so they are
/// limited to `[A-Za-z0-9_-]`.
pub fn validate_project_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("Project id must not be empty".to_string());
    }
    if id.len() > 128 {
        return Err("Project id must be at most 128 characters".to_string());
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-')))
    {
        return Err(format!("Project id contains forbidden character {:?}", c));
    }
    Ok(())
}
