//! Database repository for users, projects, the registry and project content.
//!
//! Every multi-record write runs in a single transaction. Transactions bump the
//! global revision first so the SQLite write lock is held before any read.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    append_project_id, dedupe_locales, initial_role_map, ContentRevision, InvitedUser, Locale,
    MetadataPatch, ProjectContent, ProjectLocale, ProjectMetadata, RegistryEntry, Role, RoleMap,
    User, UserRole,
};

/// Everything needed to create a project.
#[derive(Debug, Clone)]
pub struct NewProject<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub creator_uid: &'a str,
    pub creator_project_ids: &'a [String],
    pub invited: &'a [InvitedUser],
}

/// Profile fields written on sign-up.
#[derive(Debug, Clone)]
pub struct UserProfile<'a> {
    pub uid: &'a str,
    pub display_name: &'a str,
    pub email: &'a str,
    pub photo_url: &'a str,
}

/// Partial user update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    pub role: Option<UserRole>,
}

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    // ==================== USER OPERATIONS ====================

    /// List all users.
    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query(
            "SELECT uid, display_name, email, photo_url, role, project_ids, updated_at FROM users ORDER BY display_name, uid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    /// Get a user by uid.
    pub async fn get_user(&self, uid: &str) -> Result<Option<User>, AppError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_user(&mut conn, uid).await?)
    }

    /// Create a user or refresh the profile of an existing one.
    ///
    /// The role tag and the membership list of an existing record are kept.
    pub async fn upsert_user_profile(&self, profile: &UserProfile<'_>) -> Result<User, AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx, &now).await?;

        let existing = fetch_user(&mut tx, profile.uid).await?;
        let user = User {
            uid: profile.uid.to_string(),
            display_name: profile.display_name.to_string(),
            email: profile.email.to_string(),
            photo_url: profile.photo_url.to_string(),
            role: existing.as_ref().and_then(|u| u.role),
            project_ids: existing.and_then(|u| u.project_ids),
            updated_at: now,
        };
        write_user(&mut tx, &user).await?;

        tx.commit().await?;
        Ok(user)
    }

    /// Merge a partial update into an existing user.
    pub async fn update_user(&self, uid: &str, patch: &UserPatch) -> Result<User, AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx, &now).await?;

        let existing = fetch_user(&mut tx, uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", uid)))?;

        let user = User {
            display_name: patch
                .display_name
                .clone()
                .unwrap_or(existing.display_name),
            email: patch.email.clone().unwrap_or(existing.email),
            photo_url: patch.photo_url.clone().unwrap_or(existing.photo_url),
            role: patch.role.or(existing.role),
            updated_at: now,
            ..existing
        };
        write_user(&mut tx, &user).await?;

        tx.commit().await?;
        Ok(user)
    }

    // ==================== PROJECT METADATA OPERATIONS ====================

    /// List every project's metadata.
    pub async fn list_project_metadata(&self) -> Result<Vec<ProjectMetadata>, AppError> {
        let rows = sqlx::query(
            "SELECT id, name, relative_base_path, locales, user_roles, updated_at, version FROM project_metadata ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(metadata_from_row).collect()
    }

    /// Projects whose role map includes `uid`, optionally narrowed to `filter`.
    ///
    /// This scans the whole metadata table.
    pub async fn list_projects_for_user(
        &self,
        uid: &str,
        filter: Option<&[String]>,
    ) -> Result<Vec<ProjectMetadata>, AppError> {
        let projects = self.list_project_metadata().await?;
        Ok(projects
            .into_iter()
            .filter(|project| project.user_roles.contains_key(uid))
            .filter(|project| filter.is_none_or(|ids| ids.iter().any(|id| *id == project.id)))
            .collect())
    }

    /// Get project metadata by id.
    pub async fn get_project_metadata(&self, id: &str) -> Result<Option<ProjectMetadata>, AppError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_metadata(&mut conn, id).await?)
    }

    /// Create a project and every denormalized record that points at it.
    ///
    /// Metadata, empty content, the registry entry and the membership lists of
    /// the creator and invited users are written in one transaction.
    pub async fn create_project(
        &self,
        new: &NewProject<'_>,
    ) -> Result<(ProjectMetadata, RegistryEntry), AppError> {
        let now = Utc::now().to_rfc3339();
        let user_roles = initial_role_map(new.creator_uid, new.invited);
        let roles_json = serde_json::to_string(&user_roles)?;

        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx, &now).await?;

        let inserted = sqlx::query(
            "INSERT INTO project_metadata (id, name, relative_base_path, locales, user_roles, updated_at, version) VALUES (?, ?, '/', NULL, ?, ?, 1)",
        )
        .bind(new.id)
        .bind(new.name)
        .bind(&roles_json)
        .bind(&now)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if let sqlx::Error::Database(db_err) = &err {
                if db_err.is_unique_violation() {
                    return Err(AppError::Conflict(format!(
                        "Project {} already exists",
                        new.id
                    )));
                }
            }
            return Err(err.into());
        }

        sqlx::query(
            "INSERT INTO projects (id, schema_url, locales, updated_at, version) VALUES (?, NULL, '{}', ?, 1)",
        )
        .bind(new.id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        // Single statement: the index is computed and claimed atomically.
        let registry_row = sqlx::query(
            "INSERT INTO project_ids (idx, project_id) SELECT COALESCE(MAX(idx) + 1, 0), ? FROM project_ids RETURNING idx",
        )
        .bind(new.id)
        .fetch_one(&mut *tx)
        .await?;
        let registry = RegistryEntry {
            index: registry_row.get("idx"),
            project_id: new.id.to_string(),
        };

        let creator = fetch_user(&mut tx, new.creator_uid).await?;
        let mut creator = creator.unwrap_or_else(|| bare_user(new.creator_uid));
        let mut known_ids = creator.project_ids.take().unwrap_or_default();
        for id in new.creator_project_ids {
            known_ids = append_project_id(&known_ids, id);
        }
        creator.project_ids = Some(append_project_id(&known_ids, new.id));
        creator.updated_at = now.clone();
        write_user(&mut tx, &creator).await?;

        for invited in new.invited.iter().filter(|u| u.uid != new.creator_uid) {
            let stored = fetch_user(&mut tx, &invited.uid).await?;
            let mut user = stored.unwrap_or_else(|| bare_user(&invited.uid));
            merge_invited_profile(&mut user, invited);
            let mut ids = user.project_ids.take().unwrap_or_default();
            for id in invited.project_ids.iter().flatten() {
                ids = append_project_id(&ids, id);
            }
            user.project_ids = Some(append_project_id(&ids, new.id));
            user.updated_at = now.clone();
            write_user(&mut tx, &user).await?;
        }

        tx.commit().await?;

        tracing::info!(
            project_id = new.id,
            registry_index = registry.index,
            members = user_roles.len(),
            "Project created"
        );

        Ok((
            ProjectMetadata {
                id: new.id.to_string(),
                name: new.name.to_string(),
                relative_base_path: "/".to_string(),
                locales: None,
                user_roles,
                updated_at: now,
                version: 1,
            },
            registry,
        ))
    }

    /// Merge a metadata patch into the stored record.
    pub async fn update_project_metadata(
        &self,
        id: &str,
        patch: &MetadataPatch,
    ) -> Result<ProjectMetadata, AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx, &now).await?;

        let existing = fetch_metadata(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", id)))?;

        // Check version for optimistic concurrency
        if let Some(expected) = patch.expected_version {
            if existing.version != expected {
                return Err(AppError::VersionMismatch {
                    message: format!(
                        "Version mismatch: expected {}, current {}",
                        expected, existing.version
                    ),
                    current_version: existing.version,
                });
            }
        }

        let user_roles = patch
            .user_roles
            .clone()
            .unwrap_or_else(|| existing.user_roles.clone());
        if !user_roles.values().any(|role| *role == Role::Owner) {
            return Err(AppError::Validation(
                "A project must keep at least one owner".to_string(),
            ));
        }

        let merged = ProjectMetadata {
            id: existing.id.clone(),
            name: patch.name.clone().unwrap_or(existing.name.clone()),
            relative_base_path: patch
                .relative_base_path
                .clone()
                .unwrap_or(existing.relative_base_path.clone()),
            locales: patch
                .locales
                .clone()
                .map(dedupe_locales)
                .or(existing.locales.clone()),
            user_roles,
            updated_at: now,
            version: existing.version + 1,
        };

        let result = write_metadata(&mut tx, &merged, existing.version).await?;
        if result == 0 {
            return Err(AppError::VersionMismatch {
                message: "Concurrent modification detected".to_string(),
                current_version: existing.version,
            });
        }

        tx.commit().await?;
        Ok(merged)
    }

    // ==================== REGISTRY OPERATIONS ====================

    /// List the registry in index order.
    pub async fn list_registry(&self) -> Result<Vec<RegistryEntry>, AppError> {
        let rows = sqlx::query("SELECT idx, project_id FROM project_ids ORDER BY idx")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| RegistryEntry {
                index: row.get("idx"),
                project_id: row.get("project_id"),
            })
            .collect())
    }

    // ==================== CONTENT OPERATIONS ====================

    /// Get a project's content.
    pub async fn get_project_content(&self, id: &str) -> Result<Option<ProjectContent>, AppError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_content(&mut conn, id).await?)
    }

    /// Get the change-detection probe for a project's content.
    pub async fn get_content_revision(&self, id: &str) -> Result<Option<ContentRevision>, AppError> {
        let row = sqlx::query("SELECT id, version, updated_at FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| ContentRevision {
            project_id: row.get("id"),
            version: row.get("version"),
            updated_at: row.get("updated_at"),
        }))
    }

    /// Replace the schema URL and/or merge locales by code.
    pub async fn update_project_content(
        &self,
        id: &str,
        schema_url: Option<&str>,
        locales: Option<&BTreeMap<String, ProjectLocale>>,
    ) -> Result<ProjectContent, AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx, &now).await?;

        let mut content = fetch_content(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", id)))?;

        if let Some(url) = schema_url {
            content.schema_url = Some(url.to_string());
        }
        if let Some(locales) = locales {
            for (code, locale) in locales {
                content.locales.insert(code.clone(), locale.clone());
            }
        }
        content.updated_at = now;
        content.version += 1;

        write_content(&mut tx, &content).await?;
        tx.commit().await?;
        Ok(content)
    }

    /// Add a locale to the metadata list and the content map together.
    ///
    /// Existing locale content is kept when `content` is `None`.
    pub async fn create_locale(
        &self,
        id: &str,
        locale: &Locale,
        content: Option<serde_json::Value>,
    ) -> Result<(ProjectMetadata, ProjectContent), AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx, &now).await?;

        let mut metadata = fetch_metadata(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", id)))?;
        let previous_version = metadata.version;

        let mut locales = metadata.locales.take().unwrap_or_default();
        locales.push(locale.clone());
        metadata.locales = Some(dedupe_locales(locales));
        metadata.updated_at = now.clone();
        metadata.version += 1;
        if write_metadata(&mut tx, &metadata, previous_version).await? == 0 {
            return Err(AppError::VersionMismatch {
                message: "Concurrent modification detected".to_string(),
                current_version: previous_version,
            });
        }

        let mut project = fetch_content(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", id)))?;
        let kept = project
            .locales
            .get(&locale.code)
            .and_then(|existing| existing.content.clone());
        project.locales.insert(
            locale.code.clone(),
            ProjectLocale {
                name: locale.name.clone(),
                content: content.or(kept),
            },
        );
        project.updated_at = now;
        project.version += 1;
        write_content(&mut tx, &project).await?;

        tx.commit().await?;
        Ok((metadata, project))
    }
}

// Connection-level helpers shared by pool reads and transactions

async fn bump_revision(conn: &mut SqliteConnection, now: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn fetch_user(conn: &mut SqliteConnection, uid: &str) -> Result<Option<User>, AppError> {
    let row = sqlx::query(
        "SELECT uid, display_name, email, photo_url, role, project_ids, updated_at FROM users WHERE uid = ?",
    )
    .bind(uid)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

async fn write_user(conn: &mut SqliteConnection, user: &User) -> Result<(), AppError> {
    let project_ids_json = user
        .project_ids
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"INSERT INTO users (uid, display_name, email, photo_url, role, project_ids, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(uid) DO UPDATE SET
               display_name = excluded.display_name,
               email = excluded.email,
               photo_url = excluded.photo_url,
               role = excluded.role,
               project_ids = excluded.project_ids,
               updated_at = excluded.updated_at"#,
    )
    .bind(&user.uid)
    .bind(&user.display_name)
    .bind(&user.email)
    .bind(&user.photo_url)
    .bind(user.role.map(|r| r.as_str()))
    .bind(&project_ids_json)
    .bind(&user.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn fetch_metadata(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<ProjectMetadata>, AppError> {
    let row = sqlx::query(
        "SELECT id, name, relative_base_path, locales, user_roles, updated_at, version FROM project_metadata WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(metadata_from_row).transpose()
}

/// Write metadata guarded by the previous version; returns rows affected.
async fn write_metadata(
    conn: &mut SqliteConnection,
    metadata: &ProjectMetadata,
    previous_version: i64,
) -> Result<u64, AppError> {
    let locales_json = metadata
        .locales
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let roles_json = serde_json::to_string(&metadata.user_roles)?;

    let result = sqlx::query(
        "UPDATE project_metadata SET name = ?, relative_base_path = ?, locales = ?, user_roles = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?",
    )
    .bind(&metadata.name)
    .bind(&metadata.relative_base_path)
    .bind(&locales_json)
    .bind(&roles_json)
    .bind(&metadata.updated_at)
    .bind(metadata.version)
    .bind(&metadata.id)
    .bind(previous_version)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

async fn fetch_content(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<ProjectContent>, AppError> {
    let row = sqlx::query(
        "SELECT id, schema_url, locales, updated_at, version FROM projects WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(content_from_row).transpose()
}

async fn write_content(conn: &mut SqliteConnection, content: &ProjectContent) -> Result<(), AppError> {
    let locales_json = serde_json::to_string(&content.locales)?;

    sqlx::query(
        "UPDATE projects SET schema_url = ?, locales = ?, updated_at = ?, version = ? WHERE id = ?",
    )
    .bind(&content.schema_url)
    .bind(&locales_json)
    .bind(&content.updated_at)
    .bind(content.version)
    .bind(&content.project_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn bare_user(uid: &str) -> User {
    User {
        uid: uid.to_string(),
        display_name: String::new(),
        email: String::new(),
        photo_url: String::new(),
        role: None,
        project_ids: None,
        updated_at: String::new(),
    }
}

/// Fill profile fields from an invitation without blanking stored values.
fn merge_invited_profile(user: &mut User, invited: &InvitedUser) {
    let pick = |incoming: &Option<String>, current: &mut String| {
        if let Some(value) = incoming.as_deref().filter(|v| !v.is_empty()) {
            *current = value.to_string();
        }
    };
    pick(&invited.display_name, &mut user.display_name);
    pick(&invited.email, &mut user.email);
    pick(&invited.photo_url, &mut user.photo_url);
}

// Helper functions for row conversion

fn user_from_row(row: &SqliteRow) -> Result<User, AppError> {
    let role: Option<String> = row.get("role");
    let project_ids: Option<String> = row.get("project_ids");
    Ok(User {
        uid: row.get("uid"),
        display_name: row.get("display_name"),
        email: row.get("email"),
        photo_url: row.get("photo_url"),
        role: role.as_deref().and_then(UserRole::parse),
        project_ids: project_ids
            .map(|s| parse_json_column("users.project_ids", &s))
            .transpose()?,
        updated_at: row.get("updated_at"),
    })
}

fn metadata_from_row(row: &SqliteRow) -> Result<ProjectMetadata, AppError> {
    let locales: Option<String> = row.get("locales");
    let user_roles: String = row.get("user_roles");
    Ok(ProjectMetadata {
        id: row.get("id"),
        name: row.get("name"),
        relative_base_path: row.get("relative_base_path"),
        locales: locales
            .map(|s| parse_json_column::<Vec<Locale>>("project_metadata.locales", &s))
            .transpose()?,
        user_roles: parse_json_column::<RoleMap>("project_metadata.user_roles", &user_roles)?,
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    })
}

fn content_from_row(row: &SqliteRow) -> Result<ProjectContent, AppError> {
    let locales: String = row.get("locales");
    Ok(ProjectContent {
        project_id: row.get("id"),
        schema_url: row.get("schema_url"),
        locales: parse_json_column("projects.locales", &locales)?,
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    })
}

/// Decode a JSON text column. A corrupt value is an error, never an empty default.
fn parse_json_column<T: serde::de::DeserializeOwned>(column: &str, raw: &str) -> Result<T, AppError> {
    serde_json::from_str(raw).map_err(|e| {
        tracing::error!(column, "Stored JSON is corrupt: {}", e);
        AppError::Internal(format!("Stored {} could not be read", column))
    })
}
