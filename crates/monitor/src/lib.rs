//! Operator Safety Monitor
//!
//! Wiring for the `safety-monitor` binary: configuration, logging,
//! metrics, the frame scheduler, the on-frame dashboard and the per-frame
//! pipeline, plus the offline calibration and report cleanup commands.

pub mod config;
pub mod dashboard;
pub mod pipeline;
pub mod scheduler;

pub use config::{AppConfig, Profile};
pub use dashboard::{Dashboard, DashboardConfig, DashboardView};
pub use pipeline::{FaceEmbedder, FrameOutcome, FrameSource, Models, ObjectDetector, Pipeline, PipelineStats};
pub use scheduler::{Detector, FrameScheduler, ResourceSampler, ResourceSample, SystemSampler};

use anyhow::Context;
use calibration::master::{read_operator_name, INFO_FILE};
use calibration::{CalibrationSummary, MasterCalibrationManager};
use camera_capture::LandmarkDetector;
use dms::LandmarkModel;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use storage::ReportManager;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Log level after `-v` flags: one means debug, two or more trace
pub fn effective_level(configured: &str, verbose: u8) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Serve Prometheus metrics on `addr`; must be called inside the tokio runtime
pub fn install_metrics(addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse().with_context(|| format!("invalid metrics address {}", addr))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing Prometheus exporter")?;
    info!("Prometheus metrics on http://{}/metrics", addr);
    Ok(())
}

/// Calibrate from the photos directory with the configured landmark model
pub fn calibrate(config: &AppConfig, operator: Option<&str>) -> anyhow::Result<CalibrationSummary> {
    let detector = LandmarkModel::from_config(&config.dms).context("loading landmark model")?;
    calibrate_with(config, detector, operator)
}

/// Calibrate one operator (`photos_dir/<id>`) or every operator with an `info.txt`
pub fn calibrate_with<D: LandmarkDetector>(
    config: &AppConfig,
    detector: D,
    operator: Option<&str>,
) -> anyhow::Result<CalibrationSummary> {
    let mut manager = MasterCalibrationManager::new(&config.paths.operators_dir, detector);
    let Some(id) = operator else {
        return Ok(manager.calibrate_all_operators(&config.paths.photos_dir));
    };

    let dir = config.paths.photos_dir.join(id);
    if !dir.is_dir() {
        anyhow::bail!("no photos directory for operator {} at {}", id, dir.display());
    }
    let name = read_operator_name(&dir.join(INFO_FILE));
    let mut summary = CalibrationSummary {
        total_processed: 1,
        ..Default::default()
    };
    match manager.calibrate_operator(id, &dir, &name) {
        Ok(report) => {
            info!(
                "Operator {} ({}) calibrated from {} photos; modules {:?}",
                id, name, report.photos_processed, report.modules_calibrated
            );
            summary.successful.push(id.to_string());
        }
        Err(e) => {
            tracing::error!("Calibration failed for {}: {}", id, e);
            summary.failed.push(id.to_string());
        }
    }
    Ok(summary)
}

/// Delete reports past the retention period
pub fn cleanup(config: &AppConfig) -> anyhow::Result<usize> {
    let reports = ReportManager::new(config.storage.clone()).context("opening reports directory")?;
    let removed = reports.cleanup_old_reports()?;
    info!(
        "Removed {} reports older than {} days from {}",
        removed,
        config.storage.retention_days,
        config.storage.reports_dir.display()
    );
    Ok(removed)
}
