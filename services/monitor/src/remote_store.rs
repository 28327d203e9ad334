//! Remote folder abstraction and the per-date folder cache.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::local_store::date_folder_name;

/// Errors returned by a remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Folder {name} unavailable: {message}")]
    Folder { name: String, message: String },

    #[error("Upload of {file} failed: {message}")]
    Upload { file: String, message: String },
}

/// Opaque identifier of a remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderId(String);

impl FolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The store's top level, parent of every deployment folder.
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("/")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Remote storage holding a folder tree of uploaded captures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Check that credentials are valid and the store is reachable.
    async fn authorize(&self) -> Result<(), RemoteError>;

    /// Look up a folder by name under `parent`.
    async fn find_folder(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<Option<FolderId>, RemoteError>;

    /// Create a folder named `name` under `parent`.
    async fn create_folder(&self, parent: &FolderId, name: &str) -> Result<FolderId, RemoteError>;

    /// Upload a local file into `folder`, returning the remote object id.
    async fn upload_file(
        &self,
        folder: &FolderId,
        file_name: &str,
        local_path: &Path,
    ) -> Result<String, RemoteError>;
}

/// Return the folder named `name` under `parent`, creating it if missing.
pub async fn get_or_create_folder(
    store: &dyn RemoteStore,
    parent: &FolderId,
    name: &str,
) -> Result<FolderId, RemoteError> {
    if let Some(id) = store.find_folder(parent, name).await? {
        debug!(folder = %name, id = %id, "Found remote folder");
        return Ok(id);
    }

    let id = store.create_folder(parent, name).await?;
    info!(folder = %name, id = %id, "Created remote folder");
    Ok(id)
}

/// Date folders resolved under the deployment folder.
///
/// A date is only looked up (and created if missing) until the first
/// success; later captures that day reuse the cached id.
#[derive(Debug)]
pub struct FolderCache {
    root: FolderId,
    folders: HashMap<NaiveDate, FolderId>,
}

impl FolderCache {
    pub fn new(root: FolderId) -> Self {
        Self {
            root,
            folders: HashMap::new(),
        }
    }

    /// Deployment folder holding the date folders.
    pub fn root(&self) -> &FolderId {
        &self.root
    }

    pub fn cached(&self, date: NaiveDate) -> Option<&FolderId> {
        self.folders.get(&date)
    }

    /// Resolve the remote folder for `date`.
    pub async fn resolve(
        &mut self,
        store: &dyn RemoteStore,
        date: NaiveDate,
    ) -> Result<FolderId, RemoteError> {
        if let Some(id) = self.folders.get(&date) {
            return Ok(id.clone());
        }

        let id = get_or_create_folder(store, &self.root, &date_folder_name(date)).await?;
        self.folders.insert(date, id.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    #[tokio::test]
    async fn test_existing_folder_is_not_recreated() {
        let mut store = MockRemoteStore::new();
        store
            .expect_find_folder()
            .with(eq(FolderId::new("plants/")), eq("2024-05-17"))
            .times(1)
            .returning(|_, _| Ok(Some(FolderId::new("plants/2024-05-17/"))));
        store.expect_create_folder().never();

        let mut cache = FolderCache::new(FolderId::new("plants/"));
        let id = cache.resolve(&store, date(17)).await.unwrap();
        assert_eq!(id, FolderId::new("plants/2024-05-17/"));
    }

    #[tokio::test]
    async fn test_folder_created_once_per_date() {
        let mut store = MockRemoteStore::new();
        store
            .expect_find_folder()
            .times(2)
            .returning(|_, _| Ok(None));
        store
            .expect_create_folder()
            .times(2)
            .returning(|parent, name| Ok(FolderId::new(format!("{}{}/", parent.as_str(), name))));

        let mut cache = FolderCache::new(FolderId::new("plants/"));
        let first = cache.resolve(&store, date(17)).await.unwrap();
        let again = cache.resolve(&store, date(17)).await.unwrap();
        let next_day = cache.resolve(&store, date(18)).await.unwrap();

        assert_eq!(first, again);
        assert_eq!(next_day, FolderId::new("plants/2024-05-18/"));
        assert_eq!(cache.cached(date(17)), Some(&first));
    }

    #[tokio::test]
    async fn test_failed_lookup_is_not_cached() {
        let mut store = MockRemoteStore::new();
        let mut calls = 0;
        store.expect_find_folder().times(2).returning(move |_, name| {
            calls += 1;
            if calls == 1 {
                Err(RemoteError::Folder {
                    name: name.to_string(),
                    message: "connection reset".to_string(),
                })
            } else {
                Ok(Some(FolderId::new("plants/2024-05-17/")))
            }
        });

        let mut cache = FolderCache::new(FolderId::new("plants/"));
        assert!(cache.resolve(&store, date(17)).await.is_err());
        assert!(cache.cached(date(17)).is_none());
        assert!(cache.resolve(&store, date(17)).await.is_ok());
    }

    #[test]
    fn test_root_folder_display() {
        assert_eq!(FolderId::root().to_string(), "/");
        assert_eq!(FolderId::new("plants/").to_string(), "plants/");
    }
}
