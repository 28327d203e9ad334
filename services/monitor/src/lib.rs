//! Plant Monitor
//!
//! Periodically captures a still image from a camera, stores it in a
//! date-partitioned local folder and replicates it to remote storage,
//! retrying failed uploads within a bounded budget.
//!
//! ## Architecture
//!
//! ```text
//! interval tick
//!      │
//!      ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ FrameSource  │────▶│ LocalStore   │────▶│ Uploader     │
//! │ (GStreamer)  │     │ {root}/{date}│     │ retry/backoff│
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │
//!                                                  ▼
//!                                           ┌──────────────┐
//!                                           │ RemoteStore  │
//!                                           │ {root}/{date}│
//!                                           └──────────────┘
//! ```

pub mod camera;
pub mod config;
pub mod cycle;
pub mod local_store;
pub mod logging;
pub mod remote_store;
pub mod s3_store;
pub mod uploader;

#[cfg(test)]
mod testing;

pub use camera::{CaptureError, FrameSource, GstCamera};
pub use config::MonitorConfig;
pub use cycle::{CaptureCycle, CycleStats, TickOutcome};
pub use local_store::{CaptureEvent, DateFolder, LocalStore, LocalWriteError, UploadStatus};
pub use remote_store::{FolderCache, FolderId, RemoteError, RemoteStore};
pub use s3_store::S3Store;
pub use uploader::{RetryPolicy, Uploader};
