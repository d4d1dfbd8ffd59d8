//! Report writer

use crate::{StorageConfig, StorageError};
use camera_capture::VideoFrame;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Module directories created up front
pub const BASE_MODULES: [&str; 7] = [
    "fatigue",
    "behavior",
    "distraction",
    "yawn",
    "analysis",
    "operators",
    "general",
];

/// Operator attached to a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOperator {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub version: String,
    pub generated_by: String,
    pub environment: String,
}

/// One stored event report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub module: String,
    pub event_type: String,
    pub timestamp: DateTime<Local>,
    pub operator: Option<ReportOperator>,
    pub data: serde_json::Value,
    pub metadata: ReportMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    /// Where the JSON document was written
    #[serde(skip)]
    pub json_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportStats {
    pub reports_generated: u64,
    pub reports_failed: u64,
    pub images_saved: u64,
    pub last_report_time: Option<DateTime<Local>>,
}

/// Keep ids and file names to a safe character set
fn file_component(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Writes reports and keeps a bounded in-memory log of recent ones
pub struct ReportManager {
    config: StorageConfig,
    recent: Mutex<VecDeque<Report>>,
    stats: Mutex<ReportStats>,
}

impl ReportManager {
    /// Create the manager and the base module directories
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        for module in BASE_MODULES {
            let dir = config.reports_dir.join(module);
            fs::create_dir_all(&dir).map_err(|e| StorageError::Io(format!("{}: {}", dir.display(), e)))?;
        }
        info!("Report directories ready in {}", config.reports_dir.display());
        Ok(Self {
            recent: Mutex::new(VecDeque::with_capacity(config.recent_capacity.min(1000))),
            stats: Mutex::new(ReportStats::default()),
            config,
        })
    }

    pub fn reports_dir(&self) -> &Path {
        &self.config.reports_dir
    }

    /// Write a report stamped with the current local time
    pub fn generate_report(
        &self,
        module: &str,
        event_type: &str,
        data: serde_json::Value,
        frame: Option<&VideoFrame>,
        operator: Option<&ReportOperator>,
    ) -> Result<Report, StorageError> {
        self.generate_report_at(module, event_type, data, frame, operator, Local::now())
    }

    pub fn generate_report_at(
        &self,
        module: &str,
        event_type: &str,
        data: serde_json::Value,
        frame: Option<&VideoFrame>,
        operator: Option<&ReportOperator>,
        timestamp: DateTime<Local>,
    ) -> Result<Report, StorageError> {
        let result = self.write_report(module, event_type, data, frame, operator, timestamp);
        let mut stats = self.stats.lock().map_err(|e| StorageError::Lock(e.to_string()))?;
        match &result {
            Ok(report) => {
                stats.reports_generated += 1;
                stats.last_report_time = Some(timestamp);
                if report.image_path.is_some() {
                    stats.images_saved += 1;
                }
                info!("Report generated: {}", report.id);
            }
            Err(e) => {
                stats.reports_failed += 1;
                error!("Failed to generate {} report: {}", event_type, e);
            }
        }
        drop(stats);

        let report = result?;
        let mut recent = self.recent.lock().map_err(|e| StorageError::Lock(e.to_string()))?;
        while recent.len() >= self.config.recent_capacity.max(1) {
            recent.pop_front();
        }
        recent.push_back(report.clone());
        Ok(report)
    }

    fn write_report(
        &self,
        module: &str,
        event_type: &str,
        data: serde_json::Value,
        frame: Option<&VideoFrame>,
        operator: Option<&ReportOperator>,
        timestamp: DateTime<Local>,
    ) -> Result<Report, StorageError> {
        let module_dir = file_component(module);
        let event = file_component(event_type);
        let operator_id = file_component(operator.map(|o| o.id.as_str()).unwrap_or("unknown"));

        let dir = self
            .config
            .reports_dir
            .join(&module_dir)
            .join(timestamp.format("%Y").to_string())
            .join(timestamp.format("%m").to_string());
        fs::create_dir_all(&dir).map_err(|e| StorageError::Io(format!("{}: {}", dir.display(), e)))?;

        let base_name = format!("{}_{}_{}", timestamp.format("%Y%m%d_%H%M%S"), event, operator_id);
        let mut report = Report {
            id: format!(
                "{}_{}_{}_{}",
                module_dir,
                event,
                operator_id,
                timestamp.format("%Y%m%d%H%M%S")
            ),
            module: module.to_string(),
            event_type: event_type.to_string(),
            timestamp,
            operator: operator.cloned(),
            data,
            metadata: ReportMetadata {
                version: "1.0".to_string(),
                generated_by: "ReportManager".to_string(),
                environment: self.config.environment.clone(),
            },
            image_path: None,
            json_path: dir.join(format!("{}.json", base_name)),
        };

        if let (Some(frame), true) = (frame, self.config.save_images) {
            let path = dir.join(format!("{}.jpg", base_name));
            match save_jpeg(frame, &path) {
                Ok(()) => {
                    debug!("Snapshot saved: {}", path.display());
                    report.image_path = Some(path);
                }
                Err(e) => warn!("Snapshot for {} not saved: {}", report.id, e),
            }
        }

        let json =
            serde_json::to_string_pretty(&report).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        fs::write(&report.json_path, json)
            .map_err(|e| StorageError::Io(format!("{}: {}", report.json_path.display(), e)))?;
        Ok(report)
    }

    /// Delete report files older than the retention period
    pub fn cleanup_old_reports(&self) -> Result<usize, StorageError> {
        self.cleanup_older_than(SystemTime::now())
    }

    /// Retention cleanup relative to `now`; returns the number of files removed
    pub fn cleanup_older_than(&self, now: SystemTime) -> Result<usize, StorageError> {
        let retention = Duration::from_secs(self.config.retention_days as u64 * 24 * 3600);
        let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        // <module>/<year>/<month>/<file>
        for module in subdirs(&self.config.reports_dir)? {
            for year in subdirs(&module)? {
                for month in subdirs(&year)? {
                    removed += remove_older(&month, cutoff)?;
                }
            }
        }
        info!("Cleanup finished: {} files removed", removed);
        Ok(removed)
    }

    pub fn stats(&self) -> Result<ReportStats, StorageError> {
        self.stats
            .lock()
            .map(|s| s.clone())
            .map_err(|e| StorageError::Lock(e.to_string()))
    }

    /// Most recent reports, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<Report>, StorageError> {
        let recent = self.recent.lock().map_err(|e| StorageError::Lock(e.to_string()))?;
        Ok(recent.iter().rev().take(limit).cloned().collect())
    }

    /// Recent reports of one module, optionally filtered by event type
    pub fn recent_for(&self, module: &str, event_type: Option<&str>, limit: usize) -> Result<Vec<Report>, StorageError> {
        let recent = self.recent.lock().map_err(|e| StorageError::Lock(e.to_string()))?;
        Ok(recent
            .iter()
            .rev()
            .filter(|r| r.module == module)
            .filter(|r| event_type.map_or(true, |e| r.event_type == e))
            .take(limit)
            .cloned()
            .collect())
    }
}

fn save_jpeg(frame: &VideoFrame, path: &Path) -> Result<(), StorageError> {
    let img = frame.to_rgb_image().map_err(|e| StorageError::Image(e.to_string()))?;
    img.save_with_format(path, image::ImageFormat::Jpeg)
        .map_err(|e| StorageError::Image(e.to_string()))
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| StorageError::Io(format!("{}: {}", dir.display(), e)))?;
    Ok(entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect())
}

fn remove_older(dir: &Path, cutoff: SystemTime) -> Result<usize, StorageError> {
    let entries = fs::read_dir(dir).map_err(|e| StorageError::Io(format!("{}: {}", dir.display(), e)))?;
    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified());
        match modified {
            Ok(t) if t < cutoff => {
                fs::remove_file(&path).map_err(|e| StorageError::Io(format!("{}: {}", path.display(), e)))?;
                debug!("Removed old report file {}", path.display());
                removed += 1;
            }
            Ok(_) => {}
            Err(e) => warn!("Cannot read age of {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn manager(tag: &str) -> ReportManager {
        let dir = std::env::temp_dir().join(format!("storage-{}-{}", tag, uuid::Uuid::new_v4()));
        ReportManager::new(StorageConfig {
            reports_dir: dir,
            ..Default::default()
        })
        .unwrap()
    }

    fn operator() -> ReportOperator {
        ReportOperator {
            id: "OP1".to_string(),
            name: "Ana".to_string(),
        }
    }

    #[test]
    fn test_base_directories_created() {
        let m = manager("dirs");
        for module in BASE_MODULES {
            assert!(m.reports_dir().join(module).is_dir());
        }
    }

    #[test]
    fn test_report_layout_and_contents() {
        let m = manager("layout");
        let ts = Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        let report = m
            .generate_report_at("fatigue", "microsleep", json!({"count": 2}), None, Some(&operator()), ts)
            .unwrap();

        assert_eq!(report.id, "fatigue_microsleep_OP1_20240307140509");
        let expected = m
            .reports_dir()
            .join("fatigue/2024/03/20240307_140509_microsleep_OP1.json");
        assert_eq!(report.json_path, expected);

        let stored: serde_json::Value = serde_json::from_str(&fs::read_to_string(&expected).unwrap()).unwrap();
        assert_eq!(stored["data"]["count"], 2);
        assert_eq!(stored["metadata"]["version"], "1.0");
        assert_eq!(stored["operator"]["name"], "Ana");
        assert!(stored.get("image_path").is_none());
    }

    #[test]
    fn test_snapshot_saved_with_frame() {
        let m = manager("image");
        let frame = VideoFrame::filled(32, 24, [200, 120, 90], 0);
        let report = m
            .generate_report("behavior", "phone_use", json!({}), Some(&frame), None)
            .unwrap();
        let image = report.image_path.unwrap();
        assert!(image.is_file());
        assert!(image.to_string_lossy().ends_with("_phone_use_unknown.jpg"));
        assert_eq!(m.stats().unwrap().images_saved, 1);
    }

    #[test]
    fn test_stats_and_recent_queries() {
        let m = manager("stats");
        m.generate_report("fatigue", "microsleep", json!({}), None, None).unwrap();
        m.generate_report("yawn", "multiple_yawns", json!({}), None, None).unwrap();
        m.generate_report("fatigue", "fatigue_critical", json!({}), None, None).unwrap();

        let stats = m.stats().unwrap();
        assert_eq!(stats.reports_generated, 3);
        assert_eq!(stats.reports_failed, 0);
        assert!(stats.last_report_time.is_some());

        assert_eq!(m.recent(2).unwrap()[0].event_type, "fatigue_critical");
        assert_eq!(m.recent_for("fatigue", None, 10).unwrap().len(), 2);
        assert_eq!(m.recent_for("fatigue", Some("microsleep"), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let m = manager("cleanup");
        let report = m.generate_report("general", "test", json!({}), None, None).unwrap();
        assert_eq!(m.cleanup_old_reports().unwrap(), 0);
        assert!(report.json_path.is_file());

        let later = SystemTime::now() + Duration::from_secs(31 * 24 * 3600);
        assert_eq!(m.cleanup_older_than(later).unwrap(), 1);
        assert!(!report.json_path.exists());
    }

    #[test]
    fn test_unsafe_names_are_sanitised() {
        assert_eq!(file_component("../etc"), "___etc");
        assert_eq!(file_component(""), "unknown");
        assert_eq!(file_component("OP-1_a"), "OP-1_a");
    }
}
