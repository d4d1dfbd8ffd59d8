//! Application configuration
//!
//! One TOML file holds every section; any key can be overridden from the
//! environment with the `SAFETY_` prefix and `__` between sections, e.g.
//! `SAFETY_STORAGE__RETENTION_DAYS=7`.

use crate::dashboard::DashboardConfig;
use alerting::AlarmConfig;
use camera_capture::CameraConfig;
use dms::DmsConfig;
use driver_auth::AuthConfig;
use operator_analysis::AnalysisConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use storage::StorageConfig;

/// File looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "safety-monitor";
pub const ENV_PREFIX: &str = "SAFETY";

/// Deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Desktop machine with a display attached
    #[default]
    Development,
    /// Embedded board running headless
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Baselines are kept under `<operators_dir>/baseline-json`
    pub operators_dir: PathBuf,
    /// One sub-directory of photos per operator, named by id, with an `info.txt`
    pub photos_dir: PathBuf,
    /// Fills in any model path left unset
    pub model_dir: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            operators_dir: PathBuf::from("operators"),
            photos_dir: PathBuf::from("operators/photos"),
            model_dir: Some("assets/models".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Skip detectors under load
    pub enabled: bool,
    /// Seconds between two resource samples
    pub sample_interval_secs: f64,
    pub thermal_zone: PathBuf,
    /// Frames between two headless status lines
    pub status_every_frames: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_secs: 1.0,
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            status_every_frames: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape address, e.g. "0.0.0.0:9000"; disabled when unset
    pub prometheus_addr: Option<String>,
}

/// Complete monitor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub profile: Profile,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub scheduler: SchedulerConfig,
    pub metrics: MetricsConfig,
    pub dashboard: DashboardConfig,
    pub camera: CameraConfig,
    pub dms: DmsConfig,
    pub auth: AuthConfig,
    pub analysis: AnalysisConfig,
    pub alarms: AlarmConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load from `path` (or the default file when present) plus environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: AppConfig = settings.try_deserialize()?;
        Ok(config.resolved())
    }

    /// Fill unset model paths from `paths.model_dir`
    pub fn resolved(mut self) -> Self {
        if let Some(dir) = self.paths.model_dir.as_deref() {
            let defaults = DmsConfig::with_model_dir(dir);
            self.dms.face_model_path = self.dms.face_model_path.or(defaults.face_model_path);
            self.dms.landmark_model_path = self.dms.landmark_model_path.or(defaults.landmark_model_path);
            self.dms.object_model_path = self.dms.object_model_path.or(defaults.object_model_path);
        }
        self
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
