//! Operator Safety Monitor - Main Entry Point

use anyhow::Context;
use camera_capture::WebcamCapture;
use clap::{Parser, Subcommand};
use monitor::{calibrate, cleanup, effective_level, init_logging, install_metrics, AppConfig, Pipeline};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "safety-monitor", version, about = "Operator fatigue, distraction and behaviour monitor")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Raise the log level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch the camera until Ctrl+C
    Run,
    /// Build operator baselines from their photos
    Calibrate {
        /// Only this operator
        #[arg(long)]
        operator: Option<String>,
    },
    /// Delete reports past the retention period
    Cleanup,
    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&effective_level(&config.logging.level, cli.verbose), config.logging.json)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Calibrate { operator } => {
            let summary = tokio::task::spawn_blocking(move || calibrate(&config, operator.as_deref()))
                .await
                .context("calibration thread panicked")??;
            info!(
                "Calibrated {} of {} operators",
                summary.successful.len(),
                summary.total_processed
            );
            if !summary.failed.is_empty() {
                anyhow::bail!("calibration failed for {}", summary.failed.join(", "));
            }
            Ok(())
        }
        Command::Cleanup => cleanup(&config).map(|_| ()),
        Command::PrintConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("=== Operator Safety Monitor v{} ({:?}) ===", env!("CARGO_PKG_VERSION"), config.profile);
    if let Some(addr) = config.metrics.prometheus_addr.as_deref() {
        install_metrics(addr)?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let shutdown = running.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                shutdown.store(false, Ordering::Relaxed);
            }
            Err(e) => warn!("Ctrl+C handler unavailable: {}", e),
        }
    });

    // camera and audio handles stay on the thread that opened them
    let worker = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut pipeline = Pipeline::from_config(&config)?;
        let mut camera = WebcamCapture::open(config.camera.clone()).context("opening camera")?;
        pipeline.run(
            &mut camera,
            || running.load(Ordering::Relaxed),
            config.scheduler.status_every_frames,
        )
    });
    worker.await.context("monitor thread panicked")?
}
