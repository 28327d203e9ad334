//! Retrying replication of captures to remote storage.

use crate::config::UploadConfig;
use crate::local_store::{CaptureEvent, UploadStatus};
use crate::remote_store::{get_or_create_folder, FolderCache, FolderId, RemoteError, RemoteStore};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Bounds and pacing of upload retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.retry_delay(),
            multiplier: config.retry_multiplier,
            max_delay: config.retry_max_delay(),
        }
    }

    /// Total attempts allowed for one capture.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Deterministic delay sequence; never gives up on its own, the attempt
    /// counter bounds the loop.
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_randomization_factor(0.0)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max_delay.max(self.initial_delay))
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Pushes local captures into the remote date folders.
pub struct Uploader {
    store: Arc<dyn RemoteStore>,
    folders: FolderCache,
    policy: RetryPolicy,
}

impl Uploader {
    /// Authorize against the store and resolve the deployment folder.
    ///
    /// Errors here are fatal for the service.
    pub async fn connect(
        store: Arc<dyn RemoteStore>,
        config: &UploadConfig,
    ) -> Result<Self, RemoteError> {
        info!("Authorizing with remote storage...");
        store.authorize().await?;

        let root =
            get_or_create_folder(store.as_ref(), &FolderId::root(), &config.root_folder).await?;
        info!(root_folder = %root, "Remote storage ready");

        Ok(Self::new(store, root, RetryPolicy::from_config(config)))
    }

    pub fn new(store: Arc<dyn RemoteStore>, root: FolderId, policy: RetryPolicy) -> Self {
        Self {
            store,
            folders: FolderCache::new(root),
            policy,
        }
    }

    /// Upload one capture, retrying within the policy's budget.
    ///
    /// A shutdown request abandons any pending retry. The local file is
    /// never touched.
    #[instrument(skip_all, fields(file = %event.local_path.display()))]
    pub async fn upload(
        &mut self,
        event: &mut CaptureEvent,
        shutdown: &CancellationToken,
    ) -> UploadStatus {
        let max_attempts = self.policy.max_attempts();
        let mut backoff = self.policy.backoff();

        loop {
            event.upload_attempts += 1;
            let attempt = event.upload_attempts;
            counter!("plant_monitor_upload_attempts_total").increment(1);

            let error = match self.try_upload(event).await {
                Ok(object_id) => {
                    info!(
                        file_name = %event.file_name(),
                        object_id = %object_id,
                        attempt = attempt,
                        "Upload successful"
                    );
                    counter!("plant_monitor_uploads_total", "status" => "succeeded").increment(1);
                    event.upload_status = UploadStatus::Succeeded;
                    return UploadStatus::Succeeded;
                }
                Err(e) => e,
            };

            warn!(
                file_name = %event.file_name(),
                attempt = attempt,
                max_attempts = max_attempts,
                error = %error,
                "Upload attempt failed"
            );

            if attempt >= max_attempts {
                error!(
                    file_name = %event.file_name(),
                    taken_at = %event.taken_at,
                    attempts = attempt,
                    "Upload failed after {} attempts, local copy kept",
                    attempt
                );
                return self.give_up(event);
            }

            let delay = backoff.next_backoff().unwrap_or(self.policy.max_delay);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!(
                        file_name = %event.file_name(),
                        attempts = attempt,
                        "Shutdown requested, abandoning upload retries, local copy kept"
                    );
                    return self.give_up(event);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn try_upload(&mut self, event: &mut CaptureEvent) -> Result<String, RemoteError> {
        let folder = self.folders.resolve(self.store.as_ref(), event.date()).await?;
        event.remote_folder = Some(folder.clone());

        self.store
            .upload_file(&folder, &event.file_name(), &event.local_path)
            .await
    }

    fn give_up(&self, event: &mut CaptureEvent) -> UploadStatus {
        counter!("plant_monitor_uploads_total", "status" => "failed").increment(1);
        event.upload_status = UploadStatus::Failed;
        UploadStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{capture_at, ScriptedStore};
    use std::path::Path;
    use tokio::time::Instant;

    fn policy(max_retries: u32, multiplier: f64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_secs(5),
            multiplier,
            max_delay: Duration::from_secs(60),
        }
    }

    fn uploader(store: Arc<ScriptedStore>, policy: RetryPolicy) -> Uploader {
        Uploader::new(store, FolderId::new("plants/"), policy)
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(policy(0, 1.0).max_attempts(), 1);
        assert_eq!(policy(2, 1.0).max_attempts(), 3);
        assert_eq!(policy(u32::MAX, 1.0).max_attempts(), u32::MAX);
    }

    #[test]
    fn test_fixed_backoff_sequence() {
        let mut backoff = policy(3, 1.0).backoff();
        for _ in 0..3 {
            assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
        }
    }

    #[test]
    fn test_incremental_backoff_is_capped() {
        let mut policy = policy(5, 2.0);
        policy.max_delay = Duration::from_secs(15);
        let mut backoff = policy.backoff();

        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(10)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(15)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(15)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let store = Arc::new(ScriptedStore::failing_times(2));
        let mut uploader = uploader(store.clone(), policy(2, 1.0));
        let mut event = capture_at(Path::new("/images"), 12, 0, 0);

        let status = uploader.upload(&mut event, &CancellationToken::new()).await;

        assert_eq!(status, UploadStatus::Succeeded);
        assert_eq!(event.upload_status, UploadStatus::Succeeded);
        assert_eq!(event.upload_attempts, 3);
        assert_eq!(store.upload_attempts(), 3);
        assert_eq!(
            event.remote_folder,
            Some(FolderId::new("plants/2024-05-17/"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_retries_counts_retries_after_first_attempt() {
        // max_retries = 2: one initial attempt plus two retries.
        let store = Arc::new(ScriptedStore::always_failing());
        let mut uploader = uploader(store.clone(), policy(2, 1.0));
        let mut event = capture_at(Path::new("/images"), 12, 0, 0);

        let status = uploader.upload(&mut event, &CancellationToken::new()).await;

        assert_eq!(status, UploadStatus::Failed);
        assert_eq!(event.upload_status, UploadStatus::Failed);
        assert_eq!(event.upload_attempts, 3);
        assert_eq!(store.upload_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_retries_makes_first_failure_final() {
        let store = Arc::new(ScriptedStore::always_failing());
        let mut uploader = uploader(store.clone(), policy(0, 1.0));
        let mut event = capture_at(Path::new("/images"), 12, 0, 0);

        let status = uploader.upload(&mut event, &CancellationToken::new()).await;

        assert_eq!(status, UploadStatus::Failed);
        assert_eq!(event.upload_attempts, 1);
        assert_eq!(store.upload_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_wait_for_configured_delay() {
        let store = Arc::new(ScriptedStore::always_failing());
        let mut uploader = uploader(store.clone(), policy(3, 1.0));
        let mut event = capture_at(Path::new("/images"), 12, 0, 0);

        uploader.upload(&mut event, &CancellationToken::new()).await;

        let times: Vec<Instant> = store.upload_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_pending_retry() {
        let store = Arc::new(ScriptedStore::always_failing());
        let mut uploader = uploader(store.clone(), policy(5, 1.0));
        let mut event = capture_at(Path::new("/images"), 12, 0, 0);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let status = uploader.upload(&mut event, &shutdown).await;

        assert_eq!(status, UploadStatus::Failed);
        assert_eq!(store.upload_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_date_folder_reused_across_captures() {
        let store = Arc::new(ScriptedStore::failing_times(0));
        let mut uploader = uploader(store.clone(), policy(2, 1.0));
        let shutdown = CancellationToken::new();

        for second in 0..3 {
            let mut event = capture_at(Path::new("/images"), 12, 0, second);
            uploader.upload(&mut event, &shutdown).await;
        }

        assert_eq!(store.created_folders(), vec!["plants/2024-05-17/".to_string()]);
        assert_eq!(store.upload_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_creates_deployment_folder() {
        let store = Arc::new(ScriptedStore::failing_times(0));
        let config = crate::config::test_upload_config();

        let uploader = Uploader::connect(store.clone(), &config).await.unwrap();

        assert_eq!(uploader.folders.root(), &FolderId::new("plants/"));
        assert_eq!(store.created_folders(), vec!["plants/".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_fails_without_authorization() {
        let store = Arc::new(ScriptedStore::unauthorized());
        let config = crate::config::test_upload_config();

        let result = Uploader::connect(store.clone(), &config).await;

        assert!(matches!(result, Err(RemoteError::Authorization(_))));
        assert!(store.created_folders().is_empty());
    }
}
