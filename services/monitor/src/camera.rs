//! Still image capture from a V4L2 camera through GStreamer.
//!
//! The device is opened for each capture and released when the capture
//! session is dropped, so a failed capture never leaves the camera locked.

use crate::config::CameraConfig;
use async_trait::async_trait;
use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while capturing a frame.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("GStreamer initialization failed: {0}")]
    GstreamerInit(String),

    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    #[error("Camera {device} unavailable: {message}")]
    DeviceUnavailable { device: String, message: String },

    #[error("No frame received within {0:?}")]
    NoFrame(Duration),

    #[error("Frame extraction failed: {0}")]
    FrameExtraction(String),

    #[error("Image too small: {size} bytes (minimum {min})")]
    ImageTooSmall { size: usize, min: usize },
}

/// A camera that produces one encoded JPEG per call.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> Result<Bytes, CaptureError>;
}

/// GStreamer-backed camera.
pub struct GstCamera {
    config: CameraConfig,
}

impl GstCamera {
    /// Create a new camera with the given configuration.
    pub fn new(config: CameraConfig) -> Result<Self, CaptureError> {
        gst::init().map_err(|e| CaptureError::GstreamerInit(e.to_string()))?;

        info!(
            device = %config.device_path(),
            width = config.width,
            height = config.height,
            quality = config.quality,
            "Camera configured"
        );

        Ok(Self { config })
    }
}

#[async_trait]
impl FrameSource for GstCamera {
    async fn capture(&self) -> Result<Bytes, CaptureError> {
        let config = self.config.clone();
        let device = config.device_path();

        tokio::task::spawn_blocking(move || capture_blocking(&config))
            .await
            .map_err(|e| CaptureError::DeviceUnavailable {
                device,
                message: format!("capture task failed: {}", e),
            })?
    }
}

fn capture_blocking(config: &CameraConfig) -> Result<Bytes, CaptureError> {
    let session = CameraSession::open(config)?;

    // Let exposure and white balance settle.
    std::thread::sleep(config.warmup());

    let image = session.grab(config.frame_timeout())?;
    check_image_size(image, config.min_image_bytes)
}

/// Reject images too small to be a real frame.
fn check_image_size(image: Bytes, min: usize) -> Result<Bytes, CaptureError> {
    if image.len() < min {
        return Err(CaptureError::ImageTooSmall {
            size: image.len(),
            min,
        });
    }
    Ok(image)
}

/// Build the GStreamer pipeline description for a JPEG still.
fn pipeline_description(config: &CameraConfig) -> String {
    format!(
        "v4l2src device={device} \
         ! videoconvert ! videoscale \
         ! video/x-raw,width={width},height={height} \
         ! jpegenc quality={quality} \
         ! appsink name=sink sync=false max-buffers=1 drop=true",
        device = config.device_path(),
        width = config.width,
        height = config.height,
        quality = config.quality,
    )
}

/// An open camera pipeline. Dropping it releases the device.
struct CameraSession {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    device: String,
}

impl CameraSession {
    fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
        let description = pipeline_description(config);
        debug!(pipeline = %description, "Opening camera pipeline");

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| CaptureError::PipelineCreation(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::PipelineCreation("Failed to cast to Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CaptureError::PipelineCreation("appsink not found".to_string()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::PipelineCreation("Could not cast to AppSink".to_string()))?;

        // From here on the device is released by Drop on every exit path.
        let session = Self {
            pipeline,
            appsink,
            device: config.device_path(),
        };

        session
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| session.unavailable(e.to_string()))?;

        let (result, _state, _pending) = session
            .pipeline
            .state(gst::ClockTime::from_seconds(config.frame_timeout_secs));
        if let Err(e) = result {
            return Err(session
                .bus_error()
                .unwrap_or_else(|| session.unavailable(e.to_string())));
        }

        Ok(session)
    }

    /// Pull the most recent encoded frame.
    fn grab(&self, timeout: Duration) -> Result<Bytes, CaptureError> {
        let clock_timeout = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);

        let sample = match self.appsink.try_pull_sample(clock_timeout) {
            Some(sample) => sample,
            None => return Err(self.bus_error().unwrap_or(CaptureError::NoFrame(timeout))),
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::FrameExtraction("Sample has no buffer".to_string()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::FrameExtraction("Buffer not readable".to_string()))?;

        Ok(Bytes::copy_from_slice(map.as_slice()))
    }

    /// First error posted on the pipeline bus, if any.
    fn bus_error(&self) -> Option<CaptureError> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;

        match msg.view() {
            gst::MessageView::Error(err) => Some(self.unavailable(err.error().to_string())),
            _ => None,
        }
    }

    fn unavailable(&self, message: String) -> CaptureError {
        CaptureError::DeviceUnavailable {
            device: self.device.clone(),
            message,
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(device = %self.device, error = %e, "Failed to release camera");
        } else {
            debug!(device = %self.device, "Camera released");
        }
    }
}
