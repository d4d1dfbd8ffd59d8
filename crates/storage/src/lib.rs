//! Storage Layer
//!
//! Event reports written to disk: one pretty-printed JSON document per
//! event, plus an optional JPEG snapshot, filed under
//! `<reports_dir>/<module>/<YYYY>/<MM>/`.

mod reports;

pub use reports::{Report, ReportManager, ReportMetadata, ReportOperator, ReportStats, BASE_MODULES};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Image encoding error: {0}")]
    Image(String),
    #[error("Lock error: {0}")]
    Lock(String),
}

/// Report storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub reports_dir: PathBuf,
    /// Attach a JPEG snapshot when a frame is supplied
    pub save_images: bool,
    /// Reports older than this are removed by cleanup
    pub retention_days: u32,
    /// Written into each report's metadata
    pub environment: String,
    /// Reports kept in memory for queries
    pub recent_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("reports"),
            save_images: true,
            retention_days: 30,
            environment: "production".to_string(),
            recent_capacity: 1000,
        }
    }
}
