//! Object storage for project schema and asset files.
//!
//! Files live on disk under `{root}/{projectId}/schema.json` and
//! `{root}/{projectId}/assets/{name}`. The router serves the root at `/files`,
//! which is what the public URLs built here point at.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::errors::AppError;
use crate::models::{content_type_for, has_thumbnail, Asset};

const ASSETS_DIR: &str = "assets";
const SCHEMA_FILE: &str = "schema.json";

/// Local object store rooted at a directory.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl ObjectStore {
    /// Open the store, creating the root directory if needed.
    pub async fn open(root: &Path, public_base_url: &str) -> Result<Self, AppError> {
        tokio::fs::create_dir_all(root).await?;
        Ok(Self {
            root: root.to_path_buf(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Public URL of a stored object.
    pub fn public_url(&self, project_id: &str, relative: &str) -> String {
        format!("{}/files/{}/{}", self.public_base_url, project_id, relative)
    }

    /// Store a project's JSON schema and return its public URL.
    pub async fn put_schema(&self, project_id: &str, bytes: &[u8]) -> Result<String, AppError> {
        let path = self.root.join(project_id).join(SCHEMA_FILE);
        write_atomic(&path, bytes).await?;
        tracing::info!(project_id, size = bytes.len(), "Schema stored");
        Ok(self.public_url(project_id, SCHEMA_FILE))
    }

    /// Store an asset and describe it the way a listing would.
    pub async fn put_asset(
        &self,
        project_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<Asset, AppError> {
        let path = self.assets_dir(project_id).join(name);
        write_atomic(&path, bytes).await?;
        tracing::info!(project_id, asset = name, size = bytes.len(), "Asset stored");
        Ok(self.describe(project_id, name, bytes.len() as u64))
    }

    /// List a project's assets sorted by name. A project without uploads has none.
    pub async fn list_assets(&self, project_id: &str) -> Result<Vec<Asset>, AppError> {
        let mut dir = match tokio::fs::read_dir(self.assets_dir(project_id)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut assets = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // In-flight uploads are dot-prefixed temp files.
            if name.starts_with('.') {
                continue;
            }
            assets.push(self.describe(project_id, &name, metadata.len()));
        }

        assets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(assets)
    }

    fn assets_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id).join(ASSETS_DIR)
    }

    fn describe(&self, project_id: &str, name: &str, size: u64) -> Asset {
        let remote_url = self.public_url(project_id, &format!("{}/{}", ASSETS_DIR, name));
        let content_type = content_type_for(name);
        Asset {
            name: name.to_string(),
            thumbnail: has_thumbnail(content_type).then(|| remote_url.clone()),
            remote_url,
            content_type: content_type.to_string(),
            size,
        }
    }
}

/// Write to a temp file beside `path`, then rename over it.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Internal(format!("No parent directory for {:?}", path)))?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::Internal(format!("Invalid file name {:?}", path)))?;
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (ObjectStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path(), "http://cdn.example/")
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_list_assets_of_unknown_project_is_empty() {
        let (store, _dir) = store().await;
        assert!(store.list_assets("nothing-here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_and_list_assets() {
        let (store, _dir) = store().await;

        store.put_asset("p1", "b.json", b"{}").await.unwrap();
        let logo = store.put_asset("p1", "a.png", &[1, 2, 3]).await.unwrap();
        assert_eq!(logo.remote_url, "http://cdn.example/files/p1/assets/a.png");
        assert_eq!(logo.thumbnail.as_deref(), Some(logo.remote_url.as_str()));

        let assets = store.list_assets("p1").await.unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0], logo);
        assert_eq!(assets[1].name, "b.json");
        assert_eq!(assets[1].content_type, "application/json");
        assert_eq!(assets[1].size, 2);
        assert!(assets[1].thumbnail.is_none());
    }

    #[tokio::test]
    async fn test_put_asset_overwrites() {
        let (store, _dir) = store().await;
        store.put_asset("p1", "a.txt", b"first").await.unwrap();
        store.put_asset("p1", "a.txt", b"second!").await.unwrap();

        let assets = store.list_assets("p1").await.unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].size, 7);
    }

    #[tokio::test]
    async fn test_put_schema() {
        let (store, dir) = store().await;
        let url = store.put_schema("p1", br#"{"type":"object"}"#).await.unwrap();

        assert_eq!(url, "http://cdn.example/files/p1/schema.json");
        let stored = std::fs::read_to_string(dir.path().join("p1").join("schema.json")).unwrap();
        assert_eq!(stored, r#"{"type":"object"}"#);
    }
}
