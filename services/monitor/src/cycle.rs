//! The capture-upload cycle.
//!
//! Each tick captures one frame, writes it to the local date folder and
//! replicates it to the matching remote folder:
//!
//! ```text
//! Idle -> Capturing -> CaptureFailed -> Idle
//!                   -> Captured -> Uploading -> Uploaded -> Idle
//!                                            -> UploadRetry -> Uploading
//!                                            -> UploadFailed -> Idle
//! ```
//!
//! Ticks never overlap: the next tick starts no earlier than one interval
//! after the previous one started, and later if the previous one ran long.

use crate::camera::FrameSource;
use crate::config::CaptureConfig;
use crate::local_store::{CaptureEvent, LocalStore, UploadStatus};
use crate::uploader::Uploader;
use chrono::{Local, NaiveDateTime};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a single tick ended.
#[derive(Debug)]
pub enum TickOutcome {
    CaptureFailed,
    LocalWriteFailed,
    Uploaded(CaptureEvent),
    UploadFailed(CaptureEvent),
    UploadSkipped(CaptureEvent),
}

/// Counters kept across ticks.
#[derive(Debug, Default, Clone)]
pub struct CycleStats {
    pub ticks: u64,
    pub captures: u64,
    pub capture_failures: u64,
    pub write_failures: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
    pub uploads_skipped: u64,
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Timed capture loop around a camera, the local store and an uploader.
pub struct CaptureCycle {
    interval: Duration,
    camera: Arc<dyn FrameSource>,
    local: LocalStore,
    uploader: Option<Uploader>,
    stats: CycleStats,
    clock: Clock,
}

impl CaptureCycle {
    /// Create a cycle. Without an uploader captures are kept locally only.
    pub fn new(
        config: &CaptureConfig,
        camera: Arc<dyn FrameSource>,
        uploader: Option<Uploader>,
    ) -> Self {
        Self {
            interval: config.interval(),
            camera,
            local: LocalStore::new(&config.image_root),
            uploader,
            stats: CycleStats::default(),
            clock: Box::new(|| Local::now().naive_local()),
        }
    }

    /// Replace the wall clock used to timestamp captures.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Run ticks until `shutdown` is cancelled.
    ///
    /// The first tick fires immediately. Cancellation is checked between
    /// ticks; an in-flight capture is allowed to finish.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.run_tick(&shutdown).await;
        }

        info!(ticks = self.stats.ticks, "Capture cycle stopped");
    }

    /// Run a single capture-upload tick.
    pub async fn run_tick(&mut self, shutdown: &CancellationToken) -> TickOutcome {
        self.stats.ticks += 1;
        counter!("plant_monitor_ticks_total").increment(1);

        let taken_at = (self.clock)();
        debug!(taken_at = %taken_at, "Attempting to capture image");

        let image = match self.camera.capture().await {
            Ok(image) => image,
            Err(e) => {
                self.stats.capture_failures += 1;
                counter!("plant_monitor_captures_total", "status" => "failed").increment(1);
                error!(taken_at = %taken_at, error = %e, "Camera capture failed, skipping tick");
                return TickOutcome::CaptureFailed;
            }
        };

        let mut event = CaptureEvent::new(self.local.root(), taken_at, image);
        if let Err(e) = self.local.write(&event).await {
            self.stats.write_failures += 1;
            counter!("plant_monitor_captures_total", "status" => "write_failed").increment(1);
            error!(
                taken_at = %taken_at,
                path = %event.local_path.display(),
                error = %e,
                "Failed to store capture locally"
            );
            return TickOutcome::LocalWriteFailed;
        }

        self.stats.captures += 1;
        counter!("plant_monitor_captures_total", "status" => "ok").increment(1);
        info!(
            path = %event.local_path.display(),
            size_bytes = event.image.len(),
            "Image captured successfully"
        );

        let Some(uploader) = self.uploader.as_mut() else {
            self.stats.uploads_skipped += 1;
            warn!(path = %event.local_path.display(), "Skipping upload, remote storage disabled");
            return TickOutcome::UploadSkipped(event);
        };

        match uploader.upload(&mut event, shutdown).await {
            UploadStatus::Succeeded => {
                self.stats.uploads_succeeded += 1;
                match self.local.count_images(event.date()).await {
                    Ok(count) => info!(
                        date = %event.date(),
                        images = count,
                        "Total files in local folder"
                    ),
                    Err(e) => debug!(error = %e, "Could not count local images"),
                }
                TickOutcome::Uploaded(event)
            }
            UploadStatus::Failed | UploadStatus::Pending => {
                self.stats.uploads_failed += 1;
                TickOutcome::UploadFailed(event)
            }
        }
    }
}
