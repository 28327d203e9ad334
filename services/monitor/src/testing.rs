//! Scripted camera and remote store used by the unit tests.

use crate::camera::{CaptureError, FrameSource};
use crate::local_store::CaptureEvent;
use crate::remote_store::{FolderId, RemoteError, RemoteStore};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

pub fn timestamp(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 17)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

pub fn capture_at(root: &Path, h: u32, m: u32, s: u32) -> CaptureEvent {
    CaptureEvent::new(root, timestamp(h, m, s), jpeg_bytes())
}

pub fn jpeg_bytes() -> Bytes {
    let mut image = vec![0xFF, 0xD8, 0xFF, 0xE0];
    image.resize(2048, 0x42);
    image.extend_from_slice(&[0xFF, 0xD9]);
    Bytes::from(image)
}

/// Remote store whose uploads fail a scripted number of times.
pub struct ScriptedStore {
    /// `None` fails every upload
    failures_before_success: Option<u32>,
    authorized: bool,
    folders: Mutex<HashSet<String>>,
    created: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedStore {
    pub fn failing_times(failures: u32) -> Self {
        Self::build(Some(failures), true)
    }

    pub fn always_failing() -> Self {
        Self::build(None, true)
    }

    pub fn unauthorized() -> Self {
        Self::build(Some(0), false)
    }

    fn build(failures_before_success: Option<u32>, authorized: bool) -> Self {
        Self {
            failures_before_success,
            authorized,
            folders: Mutex::new(HashSet::new()),
            created: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn upload_attempts(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn upload_times(&self) -> Vec<Instant> {
        self.uploads.lock().iter().map(|(_, at)| *at).collect()
    }

    pub fn uploaded_keys(&self) -> Vec<String> {
        self.uploads.lock().iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn created_folders(&self) -> Vec<String> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl RemoteStore for ScriptedStore {
    async fn authorize(&self) -> Result<(), RemoteError> {
        if self.authorized {
            Ok(())
        } else {
            Err(RemoteError::Authorization("token expired".to_string()))
        }
    }

    async fn find_folder(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<Option<FolderId>, RemoteError> {
        let key = format!("{}{}/", parent.as_str(), name);
        Ok(self.folders.lock().get(&key).map(|k| FolderId::new(k.clone())))
    }

    async fn create_folder(&self, parent: &FolderId, name: &str) -> Result<FolderId, RemoteError> {
        let key = format!("{}{}/", parent.as_str(), name);
        self.folders.lock().insert(key.clone());
        self.created.lock().push(key.clone());
        Ok(FolderId::new(key))
    }

    async fn upload_file(
        &self,
        folder: &FolderId,
        file_name: &str,
        _local_path: &Path,
    ) -> Result<String, RemoteError> {
        let key = format!("{}{}", folder.as_str(), file_name);
        let attempt = {
            let mut uploads = self.uploads.lock();
            uploads.push((key.clone(), Instant::now()));
            uploads.len() as u32
        };

        match self.failures_before_success {
            Some(failures) if attempt > failures => Ok(key),
            _ => Err(RemoteError::Upload {
                file: file_name.to_string(),
                message: format!("simulated failure on attempt {}", attempt),
            }),
        }
    }
}

/// Camera returning scripted results, then a default image forever.
pub struct ScriptedCamera {
    results: Mutex<VecDeque<Result<Bytes, CaptureError>>>,
    captures: Mutex<Vec<Instant>>,
    delay: Duration,
}

impl ScriptedCamera {
    pub fn working() -> Self {
        Self::with_results(Vec::new())
    }

    pub fn with_results(results: Vec<Result<Bytes, CaptureError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            captures: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Working camera whose every capture takes `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::working()
        }
    }

    pub fn capture_times(&self) -> Vec<Instant> {
        self.captures.lock().clone()
    }
}

#[async_trait]
impl FrameSource for ScriptedCamera {
    async fn capture(&self) -> Result<Bytes, CaptureError> {
        self.captures.lock().push(Instant::now());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(jpeg_bytes()))
    }
}
