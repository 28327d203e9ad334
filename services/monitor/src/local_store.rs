//! Date-partitioned local image storage.
//!
//! Layout: `<image_root>/<YYYY-MM-DD>/<YYYYMMDD_HHMMSS>.jpg`. Images are
//! written to a temporary sibling and renamed into place, so the final path
//! only ever holds a complete image.

use crate::remote_store::FolderId;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while persisting a capture locally.
#[derive(Debug, Error)]
pub enum LocalWriteError {
    #[error("Failed to create date folder {path}: {source}")]
    CreateFolder { path: PathBuf, source: io::Error },

    #[error("Refusing to overwrite existing capture {0}")]
    AlreadyExists(PathBuf),

    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Remote replication state of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Succeeded,
    Failed,
}

/// A single still image acquired on one tick.
#[derive(Debug, Clone)]
pub struct CaptureEvent {
    /// Local wall-clock time of the capture
    pub taken_at: NaiveDateTime,

    /// Encoded JPEG bytes
    pub image: Bytes,

    /// Final local path, derived from `taken_at`
    pub local_path: PathBuf,

    /// Remote folder for the capture date, once resolved
    pub remote_folder: Option<FolderId>,

    /// Remote replication state
    pub upload_status: UploadStatus,

    /// Upload attempts made so far
    pub upload_attempts: u32,
}

impl CaptureEvent {
    /// Create a pending capture rooted at `image_root`.
    pub fn new(image_root: &Path, taken_at: NaiveDateTime, image: Bytes) -> Self {
        let folder = DateFolder::new(image_root, taken_at.date());
        let local_path = folder.local_dir().join(capture_file_name(taken_at));

        Self {
            taken_at,
            image,
            local_path,
            remote_folder: None,
            upload_status: UploadStatus::Pending,
            upload_attempts: 0,
        }
    }

    /// Calendar date used for both the local and remote bucket.
    pub fn date(&self) -> NaiveDate {
        self.taken_at.date()
    }

    /// File name shared by the local and remote copy.
    pub fn file_name(&self) -> String {
        capture_file_name(self.taken_at)
    }
}

/// The bucket holding all captures of one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFolder {
    date: NaiveDate,
    local_dir: PathBuf,
}

impl DateFolder {
    pub fn new(image_root: &Path, date: NaiveDate) -> Self {
        Self {
            date,
            local_dir: image_root.join(date_folder_name(date)),
        }
    }

    pub fn name(&self) -> String {
        date_folder_name(self.date)
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }
}

/// Folder name for a calendar date (`YYYY-MM-DD`).
pub fn date_folder_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// File name for a capture timestamp (`YYYYMMDD_HHMMSS.jpg`).
pub fn capture_file_name(taken_at: NaiveDateTime) -> String {
    format!("{}.jpg", taken_at.format("%Y%m%d_%H%M%S"))
}

/// Local image store rooted at the configured image directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist the capture at its derived path.
    ///
    /// The date folder is created on first use. An existing file at the
    /// derived path is never replaced.
    pub async fn write(&self, event: &CaptureEvent) -> Result<(), LocalWriteError> {
        let path = &event.local_path;
        let dir = path.parent().unwrap_or(self.root.as_path());

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| LocalWriteError::CreateFolder {
                path: dir.to_path_buf(),
                source,
            })?;

        match tokio::fs::try_exists(path).await {
            Ok(false) => {}
            Ok(true) => return Err(LocalWriteError::AlreadyExists(path.clone())),
            Err(source) => {
                return Err(LocalWriteError::Write {
                    path: path.clone(),
                    source,
                })
            }
        }

        let partial = partial_path(path);
        let result = write_new(&partial, path, &event.image).await;

        if let Err(e) = tokio::fs::remove_file(&partial).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %partial.display(), error = %e, "Failed to remove partial capture");
            }
        }

        match result {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LocalWriteError::AlreadyExists(path.clone()));
            }
            Err(source) => {
                return Err(LocalWriteError::Write {
                    path: path.clone(),
                    source,
                })
            }
        }

        debug!(
            path = %path.display(),
            size_bytes = event.image.len(),
            "Capture written"
        );
        Ok(())
    }

    /// Number of images in the local folder for `date`.
    pub async fn count_images(&self, date: NaiveDate) -> io::Result<usize> {
        let folder = DateFolder::new(&self.root, date);
        let mut entries = tokio::fs::read_dir(folder.local_dir()).await?;
        let mut count = 0;

        while let Some(entry) = entries.next_entry().await? {
            let is_jpeg = entry
                .path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("jpg"))
                .unwrap_or(false);
            if is_jpeg {
                count += 1;
            }
        }

        Ok(count)
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Write `image` to `partial`, then link it in at `path`.
///
/// Linking fails with `AlreadyExists` if `path` appeared in the meantime,
/// so an existing capture is never replaced. The caller removes `partial`.
async fn write_new(partial: &Path, path: &Path, image: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(partial).await?;
    file.write_all(image).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::hard_link(partial, path).await
}
