//! Plant monitor service.
//!
//! Captures an image every interval, keeps it under
//! `<image_root>/<YYYY-MM-DD>/` and uploads it to the matching remote folder.
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with MONITOR_)

use anyhow::{Context, Result};
use plant_monitor::config::UploadConfig;
use plant_monitor::logging::init_logging;
use plant_monitor::{CaptureCycle, CycleStats, GstCamera, MonitorConfig, S3Store, Uploader};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = MonitorConfig::load().context("Failed to load configuration")?;

    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!(
        service = "plant-monitor",
        version = env!("CARGO_PKG_VERSION"),
        "Plant monitor starting"
    );

    config.validate()?;

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    let camera = Arc::new(GstCamera::new(config.camera.clone()).context("Failed to initialize camera")?);

    let uploader = if config.upload.enabled {
        Some(connect_uploader(&config.upload).await?)
    } else {
        warn!("Remote upload disabled, captures are kept locally only");
        None
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Initiating graceful shutdown...");
            shutdown.cancel();
        }
    });

    info!(
        interval_secs = config.capture.interval_secs,
        image_root = %config.capture.image_root.display(),
        "Capturing image every {} seconds. Press Ctrl+C to stop.",
        config.capture.interval_secs
    );

    let mut cycle = CaptureCycle::new(&config.capture, camera, uploader);
    cycle.run(shutdown).await;

    log_final_stats(cycle.stats());
    info!("Plant monitor stopped");

    Ok(())
}

/// Authorize against remote storage; failure stops the service.
async fn connect_uploader(config: &UploadConfig) -> Result<Uploader> {
    let store = Arc::new(S3Store::new(config).await);

    match Uploader::connect(store, config).await {
        Ok(uploader) => Ok(uploader),
        Err(e) => {
            error!(
                bucket = %config.bucket,
                error = %e,
                "Cannot continue without remote storage access. Check AWS credentials \
                 (AWS_PROFILE or AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY) and bucket permissions"
            );
            Err(e).context("Remote storage authorization failed")
        }
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Log final statistics on shutdown.
fn log_final_stats(stats: &CycleStats) {
    info!(
        ticks = stats.ticks,
        captures = stats.captures,
        capture_failures = stats.capture_failures,
        write_failures = stats.write_failures,
        uploads_succeeded = stats.uploads_succeeded,
        uploads_failed = stats.uploads_failed,
        uploads_skipped = stats.uploads_skipped,
        "Final capture statistics"
    );
}
